//! Stream types and traits
//!
//! The data-retrieval boundary and the uniform stream surface.

use crate::cursor::{CursorState, StreamSlice};
use crate::error::Result;
use crate::incremental::{SliceIter, StreamCursor};
use crate::types::{JsonObject, JsonValue, SyncMode};
use std::fmt;
use std::sync::Arc;

/// Finite, non-restartable sequence of records read for one slice
pub type RecordIter = Box<dyn Iterator<Item = Result<JsonObject>> + Send>;

/// Everything a retriever needs to read one slice
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    /// Stream being read
    pub stream: String,
    /// Slice to read
    pub slice: StreamSlice,
    /// Sync mode of the current read
    pub sync_mode: SyncMode,
    /// Cursor field, if the stream is incremental
    pub cursor_field: Option<String>,
    /// Cursor state of the slice's partition
    pub stream_state: Option<CursorState>,
}

/// Reads the records of one slice (e.g. an HTTP or database reader).
///
/// Errors marked retryable (see [`crate::Error::transient`]) may be
/// retried by the engine; anything else aborts the stream.
pub trait Retriever: Send + Sync {
    /// Start reading the records of `request.slice`
    fn read_records(&self, request: &ReadRequest) -> Result<RecordIter>;
}

impl<F> Retriever for F
where
    F: Fn(&ReadRequest) -> Result<RecordIter> + Send + Sync,
{
    fn read_records(&self, request: &ReadRequest) -> Result<RecordIter> {
        self(request)
    }
}

/// Result of a stream availability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Stream can be read
    Available,
    /// Stream cannot be read, with the reason
    Unavailable(String),
}

impl Availability {
    /// Whether the stream can be read
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Available => f.write_str("available"),
            Availability::Unavailable(reason) => write!(f, "unavailable: {reason}"),
        }
    }
}

/// Uniform surface of a readable stream
pub trait Stream: Send + Sync {
    /// Stream name
    fn name(&self) -> &str;

    /// Whether the stream can currently be read
    fn check_availability(&self) -> Availability {
        Availability::Available
    }

    /// JSON schema of the stream's records
    fn json_schema(&self) -> JsonValue;

    /// Record field driving incremental reads
    fn cursor_field(&self) -> Option<&str>;

    /// Stream-level cursor
    fn cursor(&self) -> Arc<dyn StreamCursor>;

    /// Enumerate the slices of one sync
    fn generate_slices(&self) -> Result<SliceIter> {
        self.cursor().stream_slices()
    }

    /// Read the records of one slice
    fn read_slice(&self, slice: &StreamSlice, sync_mode: SyncMode) -> Result<RecordIter>;
}
