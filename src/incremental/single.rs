//! Cursor for unpartitioned streams

use super::{SliceIter, StreamCursor};
use crate::cursor::{Cursor, CursorState, Record, StreamSlice};
use crate::error::{Error, Result};
use crate::state::is_empty_state;
use crate::types::{JsonObject, JsonValue};
use parking_lot::Mutex;
use std::fmt;

/// Wraps one leaf cursor; the stream state is the cursor state itself
pub struct SingleStreamCursor {
    name: String,
    cursor: Mutex<Box<dyn Cursor>>,
}

impl SingleStreamCursor {
    /// Create a stream cursor around `cursor`
    pub fn new(stream: impl Into<String>, cursor: Box<dyn Cursor>) -> Self {
        Self {
            name: stream.into(),
            cursor: Mutex::new(cursor),
        }
    }
}

impl fmt::Debug for SingleStreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleStreamCursor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl StreamCursor for SingleStreamCursor {
    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        if is_empty_state(state) {
            return Ok(());
        }
        let state = state.as_object().ok_or_else(|| {
            Error::invalid_state(format!("stream {}: expected an object, got {state}", self.name))
        })?;
        self.cursor.lock().set_initial_state(state)
    }

    fn stream_slices(&self) -> Result<SliceIter> {
        let slices = self.cursor.lock().stream_slices();
        Ok(Box::new(slices.map(|s| Ok(StreamSlice::unpartitioned(s)))))
    }

    fn observe(&self, record: &Record) -> Result<()> {
        self.cursor.lock().observe(&record.slice, record);
        Ok(())
    }

    fn close_slice(&self, slice: &StreamSlice) -> Result<()> {
        self.cursor.lock().close_slice(slice)
    }

    fn get_stream_state(&self) -> JsonValue {
        JsonValue::Object(self.cursor.lock().get_stream_state())
    }

    fn get_updated_state(&self) -> JsonValue {
        JsonValue::Object(self.cursor.lock().get_updated_state())
    }

    fn select_state(&self, _slice: &StreamSlice) -> Option<CursorState> {
        let state: JsonObject = self.cursor.lock().get_stream_state();
        (!state.is_empty()).then_some(state)
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        self.cursor.lock().should_be_synced(record)
    }
}
