//! Partition types and traits
//!
//! Defines the core partition abstractions.

use crate::cursor::PartitionKey;
use crate::error::Result;
use crate::types::JsonObject;
use serde::{Deserialize, Serialize};

/// Lazy, finite sequence of partition keys
pub type PartitionIter = Box<dyn Iterator<Item = Result<PartitionKey>> + Send>;

/// Configuration for partition routing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionConfig {
    /// No partitioning
    #[default]
    None,

    /// Partition based on a static list
    List {
        /// List of values
        values: Vec<String>,
        /// Field name to use in partitions
        partition_field: String,
    },

    /// Partition based on parent stream records
    Parent {
        /// Name of the parent stream
        parent_stream: String,
        /// Field to extract from parent records
        parent_key: String,
        /// Field name to use in partitions
        partition_field: String,
        /// Whether the parent's cursor state is tracked alongside the child's
        #[serde(default)]
        incremental_dependency: bool,
    },
}

impl PartitionConfig {
    /// Create list-based partition config
    pub fn list(values: Vec<String>, partition_field: impl Into<String>) -> Self {
        Self::List {
            values,
            partition_field: partition_field.into(),
        }
    }

    /// Create parent-based partition config
    pub fn parent(
        parent_stream: impl Into<String>,
        parent_key: impl Into<String>,
        partition_field: impl Into<String>,
    ) -> Self {
        Self::Parent {
            parent_stream: parent_stream.into(),
            parent_key: parent_key.into(),
            partition_field: partition_field.into(),
            incremental_dependency: false,
        }
    }

    /// Name of the parent stream, if any
    pub fn parent_stream(&self) -> Option<&str> {
        match self {
            Self::Parent { parent_stream, .. } => Some(parent_stream),
            _ => None,
        }
    }
}

/// Trait for partition routers
///
/// Routers are shared between the thread enumerating slices and the
/// thread serializing state, so every method takes `&self`.
pub trait PartitionRouter: Send + Sync {
    /// Enumerate partition keys in sync order
    fn partitions(&self) -> Result<PartitionIter>;

    /// State of the parent streams, keyed by parent stream name
    fn get_stream_state(&self) -> Option<JsonObject> {
        None
    }

    /// Restore parent stream state from a previous sync
    fn set_initial_state(&self, _parent_state: &JsonObject) -> Result<()> {
        Ok(())
    }
}
