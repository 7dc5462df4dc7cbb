//! Resumable full refresh cursor
//!
//! Tracks positional progress (e.g. a page token) for streams without a
//! natural incrementing field.

use super::types::{Cursor, CursorSlice, CursorSliceIter, CursorState, Record, StreamSlice};
use crate::error::{Error, Result};
use crate::types::JsonValue;

/// State key written once the full refresh has read every slice
pub const FULL_REFRESH_COMPLETE_KEY: &str = "__ab_full_refresh_sync_complete";

/// Cursor whose state is the last closed position of a full refresh
#[derive(Debug, Clone, Default)]
pub struct ResumableFullRefreshCursor {
    state: CursorState,
    slices_started: bool,
}

impl ResumableFullRefreshCursor {
    /// Create a cursor starting from the beginning
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last sync read everything
    pub fn is_complete(&self) -> bool {
        is_full_refresh_complete(&self.state)
    }
}

/// Whether a cursor state carries the full refresh completion marker
pub fn is_full_refresh_complete(state: &CursorState) -> bool {
    state
        .get(FULL_REFRESH_COMPLETE_KEY)
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

impl Cursor for ResumableFullRefreshCursor {
    fn set_initial_state(&mut self, state: &CursorState) -> Result<()> {
        if self.slices_started {
            return Err(Error::cursor(
                "Initial state can only be set before slices are produced",
            ));
        }
        self.state = state.clone();
        Ok(())
    }

    fn stream_slices(&mut self) -> CursorSliceIter {
        self.slices_started = true;
        // A finished refresh starts over from the first position
        let position = if self.is_complete() {
            CursorSlice::new()
        } else {
            self.state.clone()
        };
        Box::new(std::iter::once(position))
    }

    fn observe(&mut self, _slice: &StreamSlice, _record: &Record) {}

    fn close_slice(&mut self, _slice: &StreamSlice) -> Result<()> {
        let mut state = CursorState::new();
        state.insert(FULL_REFRESH_COMPLETE_KEY.to_string(), JsonValue::Bool(true));
        self.state = state;
        Ok(())
    }

    fn get_stream_state(&self) -> CursorState {
        self.state.clone()
    }

    fn should_be_synced(&self, _record: &Record) -> bool {
        true
    }
}
