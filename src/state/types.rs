//! State types for tracking sync progress
//!
//! These are the shapes handed to and received from the state store.

use crate::cursor::{CursorState, PartitionKey};
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete state for a source, keyed by stream name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream state objects
    #[serde(default)]
    pub streams: BTreeMap<String, JsonValue>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&JsonValue> {
        self.streams.get(stream)
    }

    /// Replace state for a stream
    pub fn set_stream(&mut self, stream: impl Into<String>, state: JsonValue) {
        self.streams.insert(stream.into(), state);
    }
}

/// One row of the per-partition state table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionStateEntry {
    /// Partition key
    pub partition: PartitionKey,
    /// Cursor state of that partition
    pub cursor: CursorState,
}

/// `{states: [...], state?, use_global_cursor?, parent_state?}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerPartitionState {
    /// Ordered per-partition entries
    pub states: Vec<PartitionStateEntry>,

    /// Cursor state for partitions without an entry of their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CursorState>,

    /// Set once the stream tracks only the fallback state
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_global_cursor: bool,

    /// Parent stream states, keyed by parent stream name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_state: Option<JsonObject>,
}

impl PerPartitionState {
    /// Parse a stream state object, rejecting any other shape
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        parse_shape(value, "{states: [...]}")
    }

    /// Serialize into a JSON value
    pub fn to_value(&self) -> JsonValue {
        to_value(self)
    }
}

/// `{state, parent_state?, lookback_window?}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalState {
    /// Shared cursor state
    #[serde(default)]
    pub state: CursorState,

    /// Parent stream states, keyed by parent stream name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_state: Option<JsonObject>,

    /// Rewind needed to cover partitions still open at the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookback_window: Option<u64>,
}

impl GlobalState {
    /// Parse a stream state object, rejecting any other shape
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        parse_shape(value, "{state, parent_state, lookback_window}")
    }

    /// Serialize into a JSON value
    pub fn to_value(&self) -> JsonValue {
        to_value(self)
    }
}

/// Whether a stream state carries nothing (`null` or `{}`)
pub fn is_empty_state(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn parse_shape<T: DeserializeOwned>(value: &JsonValue, expected: &str) -> Result<T> {
    if !value.is_object() {
        return Err(Error::invalid_state(format!(
            "expected an object shaped {expected}, got {value}"
        )));
    }
    T::deserialize(value).map_err(|e| {
        Error::invalid_state(format!("expected a state shaped {expected}: {e}"))
    })
}

fn to_value<T: Serialize>(shape: &T) -> JsonValue {
    serde_json::to_value(shape).unwrap_or_else(|_| JsonValue::Object(JsonObject::new()))
}
