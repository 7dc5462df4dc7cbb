//! Partition router implementations
//!
//! Each router handles a specific partitioning strategy.

use super::types::{PartitionIter, PartitionRouter};
use crate::cursor::{PartitionKey, Record, StreamSlice};
use crate::error::{Error, Result};
use crate::stream::{RecordIter, SliceIter, Stream};
use crate::types::{JsonObject, JsonValue, SyncMode};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key under which a substream partition carries its parent's partition
pub const PARENT_SLICE_KEY: &str = "parent_slice";

// ============================================================================
// Single Partition Router
// ============================================================================

/// Router for unpartitioned streams: one empty partition key
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePartitionRouter;

impl PartitionRouter for SinglePartitionRouter {
    fn partitions(&self) -> Result<PartitionIter> {
        Ok(Box::new(std::iter::once(Ok(PartitionKey::new()))))
    }
}

// ============================================================================
// List Router
// ============================================================================

/// List-based partition router
///
/// Creates partitions from a static list of values.
#[derive(Debug, Clone)]
pub struct ListRouter {
    /// List of partition values
    values: Vec<String>,
    /// Field name for partition
    partition_field: String,
}

impl ListRouter {
    /// Create a new list router
    pub fn new(values: Vec<String>, partition_field: impl Into<String>) -> Self {
        Self {
            values,
            partition_field: partition_field.into(),
        }
    }

    /// Get the partition field name
    pub fn partition_field(&self) -> &str {
        &self.partition_field
    }
}

impl PartitionRouter for ListRouter {
    fn partitions(&self) -> Result<PartitionIter> {
        let field = self.partition_field.clone();
        let keys: Vec<Result<PartitionKey>> = self
            .values
            .iter()
            .map(|v| Ok(PartitionKey::new().with_value(field.clone(), v.clone())))
            .collect();
        Ok(Box::new(keys.into_iter()))
    }
}

// ============================================================================
// Parent Router
// ============================================================================

/// Parent stream-based partition router
///
/// Reads the parent stream slice by slice and turns every parent record
/// into a partition `{<partition_field>: record[<parent_key>], "parent_slice": <parent partition>}`.
/// With `incremental_dependency` the parent's own cursor observes the
/// records and closes its slices, so the parent only re-reads what changed.
#[derive(Clone)]
pub struct ParentRouter {
    /// Parent stream
    parent: Arc<dyn Stream>,
    /// Key to extract from parent records
    parent_key: String,
    /// Field name for partition
    partition_field: String,
    /// Track the parent's cursor state
    incremental_dependency: bool,
}

impl ParentRouter {
    /// Create a new parent router
    pub fn new(
        parent: Arc<dyn Stream>,
        parent_key: impl Into<String>,
        partition_field: impl Into<String>,
    ) -> Self {
        Self {
            parent,
            parent_key: parent_key.into(),
            partition_field: partition_field.into(),
            incremental_dependency: false,
        }
    }

    /// Track and expose the parent stream's cursor state
    #[must_use]
    pub fn with_incremental_dependency(mut self, enabled: bool) -> Self {
        self.incremental_dependency = enabled;
        self
    }

    /// Name of the parent stream
    pub fn parent_name(&self) -> &str {
        self.parent.name()
    }
}

impl fmt::Debug for ParentRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentRouter")
            .field("parent", &self.parent.name())
            .field("parent_key", &self.parent_key)
            .field("partition_field", &self.partition_field)
            .field("incremental_dependency", &self.incremental_dependency)
            .finish()
    }
}

impl PartitionRouter for ParentRouter {
    fn partitions(&self) -> Result<PartitionIter> {
        let slices = self
            .parent
            .generate_slices()
            .map_err(|e| e.in_enumeration(self.parent.name()))?;

        Ok(Box::new(ParentPartitions {
            router: self.clone(),
            slices,
            current: None,
            done: false,
        }))
    }

    fn get_stream_state(&self) -> Option<JsonObject> {
        if !self.incremental_dependency {
            return None;
        }
        let mut state = JsonObject::new();
        state.insert(
            self.parent.name().to_string(),
            self.parent.cursor().get_stream_state(),
        );
        Some(state)
    }

    fn set_initial_state(&self, parent_state: &JsonObject) -> Result<()> {
        if !self.incremental_dependency {
            return Ok(());
        }
        match parent_state.get(self.parent.name()) {
            Some(state) => self.parent.cursor().set_initial_state(state),
            None => Ok(()),
        }
    }
}

/// Lazy walk over the parent's slices and records
struct ParentPartitions {
    router: ParentRouter,
    slices: SliceIter,
    current: Option<(StreamSlice, RecordIter)>,
    done: bool,
}

impl ParentPartitions {
    fn fail(&mut self, err: Error) -> Error {
        self.done = true;
        err.in_enumeration(self.router.parent.name())
    }

    fn partition_for(&self, record: &Record) -> Option<PartitionKey> {
        let value = match record.value_at(&self.router.parent_key) {
            Some(v @ (JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_))) => {
                v.clone()
            }
            _ => {
                warn!(
                    "Parent record in {} has no scalar '{}', skipping",
                    record.stream, self.router.parent_key
                );
                return None;
            }
        };

        Some(
            PartitionKey::new()
                .with_value(self.router.partition_field.clone(), value)
                .with_value(PARENT_SLICE_KEY, record.slice.partition.to_value()),
        )
    }

    fn next_record(&mut self) -> Option<Result<Record>> {
        let (slice, records) = self.current.as_mut()?;
        match records.next() {
            Some(Ok(data)) => Some(Ok(Record::new(
                self.router.parent.name(),
                data,
                slice.clone(),
            ))),
            Some(Err(e)) => Some(Err(e)),
            None => None,
        }
    }
}

impl Iterator for ParentPartitions {
    type Item = Result<PartitionKey>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if self.current.is_some() {
                match self.next_record() {
                    Some(Ok(record)) => {
                        if self.router.incremental_dependency {
                            if let Err(e) = self.router.parent.cursor().observe(&record) {
                                return Some(Err(self.fail(e)));
                            }
                        }
                        if let Some(partition) = self.partition_for(&record) {
                            return Some(Ok(partition));
                        }
                        continue;
                    }
                    Some(Err(e)) => return Some(Err(self.fail(e))),
                    None => {
                        if let Some((slice, _)) = self.current.take() {
                            debug!(
                                "Parent {} slice done: {}",
                                self.router.parent.name(),
                                slice.describe()
                            );
                            if self.router.incremental_dependency {
                                if let Err(e) = self.router.parent.cursor().close_slice(&slice) {
                                    return Some(Err(self.fail(e)));
                                }
                            }
                        }
                        continue;
                    }
                }
            }

            match self.slices.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(self.fail(e))),
                Some(Ok(slice)) => {
                    let mode = if self.router.incremental_dependency {
                        SyncMode::Incremental
                    } else {
                        SyncMode::FullRefresh
                    };
                    match self.router.parent.read_slice(&slice, mode) {
                        Ok(records) => self.current = Some((slice, records)),
                        Err(e) => return Some(Err(self.fail(e))),
                    }
                }
            }
        }
    }
}
