//! Cursor module
//!
//! Progress tracking for a single logical partition.
//!
//! # Overview
//!
//! The cursor module provides:
//! - `PartitionKey`, `StreamSlice`, `Record` - the data model shared by
//!   routers, cursors, and the read engine
//! - `Cursor` - the leaf progress-tracking trait
//! - `DatetimeCursor` - slices a datetime window and tracks the highest
//!   observed datetime
//! - `ResumableFullRefreshCursor` - positional progress for full refreshes

mod datetime;
mod resumable;
mod types;

pub use datetime::{parse_datetime, parse_duration, DatetimeCursor, DatetimeCursorConfig};
pub use resumable::{is_full_refresh_complete, ResumableFullRefreshCursor, FULL_REFRESH_COMPLETE_KEY};
pub use types::{
    Cursor, CursorFactory, CursorSlice, CursorSliceIter, CursorState, PartitionKey, Record,
    StreamSlice,
};
