//! Cursor data model and the leaf cursor trait
//!
//! Defines partition keys, stream slices, records, and the `Cursor`
//! abstraction that tracks progress for one logical partition.

use crate::error::Result;
use crate::types::{compact, JsonObject, JsonValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque description of one unit of incremental work (e.g. a date range)
pub type CursorSlice = JsonObject;

/// Serializable progress marker of a single cursor
pub type CursorState = JsonObject;

/// Lazy, finite sequence of cursor slices
pub type CursorSliceIter = Box<dyn Iterator<Item = CursorSlice> + Send>;

// ============================================================================
// Partition Key
// ============================================================================

/// Scalar key/value pairs identifying one partition.
///
/// Keys compare structurally: two keys built from the same pairs in a
/// different order are equal and hash the same.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(JsonObject);

impl PartitionKey {
    /// Create an empty partition key (the single partition of an unpartitioned stream)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to the key
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Get a string value by key
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    /// Whether the key has no pairs
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical string form, stable across insertion order
    pub fn key(&self) -> String {
        compact(&self.0)
    }

    /// Borrow the underlying pairs
    pub fn as_object(&self) -> &JsonObject {
        &self.0
    }

    /// Convert into a JSON value
    pub fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.0.clone())
    }
}

impl From<JsonObject> for PartitionKey {
    fn from(values: JsonObject) -> Self {
        Self(values)
    }
}

impl PartialEq for PartitionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for PartitionKey {}

impl Hash for PartitionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ============================================================================
// Stream Slice
// ============================================================================

/// One unit of work: a partition key plus a cursor-specific sub-range
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamSlice {
    /// Partition this slice belongs to
    pub partition: PartitionKey,
    /// Cursor sub-range within the partition
    #[serde(default)]
    pub cursor_slice: CursorSlice,
}

impl StreamSlice {
    /// Create a new stream slice
    pub fn new(partition: PartitionKey, cursor_slice: CursorSlice) -> Self {
        Self {
            partition,
            cursor_slice,
        }
    }

    /// Slice of an unpartitioned stream
    pub fn unpartitioned(cursor_slice: CursorSlice) -> Self {
        Self::new(PartitionKey::new(), cursor_slice)
    }

    /// Look up a value in the cursor slice first, then in the partition
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.cursor_slice
            .get(key)
            .or_else(|| self.partition.get(key))
    }

    /// Partition and cursor values merged into one mapping, as retrievers
    /// see them when building requests
    pub fn to_object(&self) -> JsonObject {
        let mut merged = self.partition.as_object().clone();
        for (key, value) in &self.cursor_slice {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Compact description for logs and error context
    pub fn describe(&self) -> String {
        format!(
            "{{partition: {}, cursor_slice: {}}}",
            self.partition.key(),
            compact(&self.cursor_slice)
        )
    }
}

// ============================================================================
// Record
// ============================================================================

/// A data item tagged with the slice it was produced from
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stream the record belongs to
    pub stream: String,
    /// Record payload
    pub data: JsonObject,
    /// Slice that produced this record
    pub slice: StreamSlice,
}

impl Record {
    /// Create a new record
    pub fn new(stream: impl Into<String>, data: JsonObject, slice: StreamSlice) -> Self {
        Self {
            stream: stream.into(),
            data,
            slice,
        }
    }

    /// Get a top-level field
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.data.get(field)
    }

    /// Get a possibly nested field using dot notation (e.g. "data.updated_at")
    pub fn value_at(&self, path: &str) -> Option<&JsonValue> {
        let mut parts = path.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }
}

// ============================================================================
// Cursor Trait
// ============================================================================

/// Progress tracking for one logical partition.
///
/// A cursor is driven from a single thread: slices are produced with
/// `stream_slices`, records are reported through `observe`, and the
/// observed progress only becomes visible in `get_stream_state` once the
/// slice is closed.
pub trait Cursor: Send {
    /// Seed the cursor from persisted state. Only valid before the first
    /// call to `stream_slices`.
    fn set_initial_state(&mut self, state: &CursorState) -> Result<()>;

    /// Produce the units of work, starting from the committed state
    fn stream_slices(&mut self) -> CursorSliceIter;

    /// Record that `record` was read while processing `slice`
    fn observe(&mut self, slice: &StreamSlice, record: &Record);

    /// Commit the highest observed value for `slice`
    fn close_slice(&mut self, slice: &StreamSlice) -> Result<()>;

    /// Latest committed state
    fn get_stream_state(&self) -> CursorState;

    /// Committed state with observed-but-unclosed progress folded in
    fn get_updated_state(&self) -> CursorState {
        self.get_stream_state()
    }

    /// Whether a record is new enough to be emitted
    fn should_be_synced(&self, record: &Record) -> bool;

    /// Ordinal position of a record's cursor value, in cursor units
    fn position(&self, _record: &Record) -> Option<i64> {
        None
    }

    /// Ordinal position of the committed cursor value, in cursor units
    fn committed_position(&self) -> Option<i64> {
        None
    }

    /// Ordinal position the cursor's slices start from, in cursor units
    fn start_position(&self) -> Option<i64> {
        None
    }

    /// Move the starting point of the next slices back by `units`
    fn rewind(&mut self, _units: u64) {}
}

/// Builds a fresh cursor for each partition
pub trait CursorFactory: Send + Sync {
    /// Create a new cursor with empty state
    fn create_cursor(&self) -> Result<Box<dyn Cursor>>;
}

impl<F> CursorFactory for F
where
    F: Fn() -> Box<dyn Cursor> + Send + Sync,
{
    fn create_cursor(&self) -> Result<Box<dyn Cursor>> {
        Ok(self())
    }
}
