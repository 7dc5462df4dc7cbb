//! Stream facade
//!
//! One surface for a stream regardless of how it is read.

use super::types::{Availability, RecordIter, Stream};
use crate::cursor::StreamSlice;
use crate::engine::{ConcurrentRead, ReadConfig, SequentialRead, StreamRead};
use crate::error::Result;
use crate::incremental::{SliceIter, StreamCursor};
use crate::types::{JsonValue, SyncMode};
use std::fmt;
use std::sync::Arc;

/// Wraps a stream with the read configuration that decides between
/// sequential and concurrent execution
#[derive(Clone)]
pub struct StreamFacade {
    stream: Arc<dyn Stream>,
    config: ReadConfig,
}

impl StreamFacade {
    /// Create a facade over `stream`
    pub fn new(stream: Arc<dyn Stream>, config: ReadConfig) -> Self {
        Self { stream, config }
    }

    /// The wrapped stream
    pub fn inner(&self) -> &Arc<dyn Stream> {
        &self.stream
    }

    /// Read configuration
    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    /// Whether reads use worker threads
    pub fn is_concurrent(&self) -> bool {
        self.config.is_concurrent()
    }

    /// Start a read; the output contract is the same in both modes
    pub fn read(&self, sync_mode: SyncMode) -> StreamRead {
        let stream = Arc::clone(&self.stream);
        if self.is_concurrent() {
            StreamRead::Concurrent(ConcurrentRead::new(stream, sync_mode, self.config.clone()))
        } else {
            StreamRead::Sequential(SequentialRead::new(stream, sync_mode, &self.config))
        }
    }
}

impl fmt::Debug for StreamFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFacade")
            .field("stream", &self.stream.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Stream for StreamFacade {
    fn name(&self) -> &str {
        self.stream.name()
    }

    fn check_availability(&self) -> Availability {
        self.stream.check_availability()
    }

    fn json_schema(&self) -> JsonValue {
        self.stream.json_schema()
    }

    fn cursor_field(&self) -> Option<&str> {
        self.stream.cursor_field()
    }

    fn cursor(&self) -> Arc<dyn StreamCursor> {
        self.stream.cursor()
    }

    fn generate_slices(&self) -> Result<SliceIter> {
        self.stream.generate_slices()
    }

    fn read_slice(&self, slice: &StreamSlice, sync_mode: SyncMode) -> Result<RecordIter> {
        self.stream.read_slice(slice, sync_mode)
    }
}
