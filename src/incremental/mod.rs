//! Incremental sync module
//!
//! Aggregates leaf cursors into one stream-level cursor.
//!
//! # Overview
//!
//! The incremental module provides:
//! - `StreamCursor` - the stream-level cursor shared by the read engine
//! - `PerPartitionCursor` - one leaf cursor per partition, bounded state table
//! - `GlobalSubstreamCursor` - one shared leaf cursor for all partitions
//! - `SingleStreamCursor` - one leaf cursor for an unpartitioned stream
//!
//! Stream cursors are used from two threads at once: slices are
//! enumerated by the producer while records are observed by the
//! consuming iterator. Each implementation keeps its tables behind a
//! single lock.

mod global;
mod per_partition;
mod single;

pub use global::GlobalSubstreamCursor;
pub use per_partition::{PerPartitionCursor, DEFAULT_MAX_PARTITIONS};
pub use single::SingleStreamCursor;

use crate::cursor::{CursorState, Record, StreamSlice};
use crate::error::Result;
use crate::types::JsonValue;

/// Lazy, finite sequence of stream slices
pub type SliceIter = Box<dyn Iterator<Item = Result<StreamSlice>> + Send>;

/// Stream-level cursor
pub trait StreamCursor: Send + Sync {
    /// Seed from the stream's persisted state. Only valid before slices
    /// are produced.
    fn set_initial_state(&self, state: &JsonValue) -> Result<()>;

    /// Enumerate `(partition, cursor_slice)` pairs in sync order
    fn stream_slices(&self) -> Result<SliceIter>;

    /// Dispatch a record to the cursor owning its slice
    fn observe(&self, record: &Record) -> Result<()>;

    /// Commit the owning cursor's progress for `slice`
    fn close_slice(&self, slice: &StreamSlice) -> Result<()>;

    /// Latest committed state, in the stream's state shape
    fn get_stream_state(&self) -> JsonValue;

    /// Checkpoint snapshot including observed but unclosed progress
    fn get_updated_state(&self) -> JsonValue {
        self.get_stream_state()
    }

    /// Cursor state handed to the retriever for `slice`
    fn select_state(&self, slice: &StreamSlice) -> Option<CursorState>;

    /// Whether a record is new enough to be emitted
    fn should_be_synced(&self, record: &Record) -> bool;
}
