//! Execution engine module
//!
//! Read loop and stream orchestration.
//!
//! # Overview
//!
//! The engine module provides:
//! - `ConcurrentRead` - producer, worker pool, and consumer threads with
//!   output re-linearized in slice order
//! - `SequentialRead` - the same output contract in the caller's thread
//! - `SyncEngine` - reads streams against a `StateManager`
//! - Message types for output (Record, State, Status)

mod checkpoint;
mod concurrent;
mod queue;
mod retry;
mod sequential;
mod types;

pub use checkpoint::CheckpointTracker;
pub use concurrent::ConcurrentRead;
pub use queue::{QueueItem, ResultQueue};
pub use retry::RetryPolicy;
pub use sequential::SequentialRead;
pub use types::{Message, ReadConfig, StreamStatus, SyncStats};

use crate::error::Result;
use crate::state::StateManager;
use crate::stream::{Stream, StreamFacade};
use crate::types::SyncMode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A running read of one stream, sequential or concurrent
pub enum StreamRead {
    /// Read in the caller's thread
    Sequential(SequentialRead),
    /// Read with worker threads
    Concurrent(ConcurrentRead),
}

impl StreamRead {
    /// Statistics so far
    pub fn stats(&self) -> &SyncStats {
        match self {
            StreamRead::Sequential(read) => read.stats(),
            StreamRead::Concurrent(read) => read.stats(),
        }
    }

    /// Whether worker threads are used
    pub fn is_concurrent(&self) -> bool {
        matches!(self, StreamRead::Concurrent(_))
    }
}

impl Iterator for StreamRead {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            StreamRead::Sequential(read) => read.next(),
            StreamRead::Concurrent(read) => read.next(),
        }
    }
}

/// Sync engine for orchestrating data extraction
pub struct SyncEngine {
    /// State manager
    state: StateManager,
    /// Read configuration
    config: ReadConfig,
    /// Statistics
    stats: SyncStats,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(state: StateManager) -> Self {
        Self {
            state,
            config: ReadConfig::default(),
            stats: SyncStats::default(),
        }
    }

    /// Set read configuration
    #[must_use]
    pub fn with_config(mut self, config: ReadConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the state manager
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Get the read configuration
    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.stats = SyncStats::default();
    }

    /// Read one stream, passing every message to `emit`.
    ///
    /// The stream's cursor is seeded from the state manager and every
    /// emitted state is written back to it.
    pub fn sync_stream<F>(&mut self, stream: Arc<dyn Stream>, sync_mode: SyncMode, emit: &mut F) -> Result<()>
    where
        F: FnMut(Message) -> Result<()>,
    {
        let name = stream.name().to_string();

        let availability = stream.check_availability();
        if !availability.is_available() {
            warn!("Skipping stream {name}: {availability}");
            self.stats.add_skipped_stream();
            return Ok(());
        }

        if let Some(state) = self.state.get_stream_state(&name) {
            if let Err(e) = stream.cursor().set_initial_state(&state) {
                self.stats.add_error();
                return Err(e);
            }
        }

        let mut read = StreamFacade::new(stream, self.config.clone()).read(sync_mode);
        let result = self.drain(&mut read, emit);
        self.stats.merge(read.stats());
        result
    }

    fn drain<F>(&self, read: &mut StreamRead, emit: &mut F) -> Result<()>
    where
        F: FnMut(Message) -> Result<()>,
    {
        for message in read {
            let message = message?;
            if let Message::State { stream, data } = &message {
                self.state.set_stream_state(stream, data.clone());
            }
            emit(message)?;
        }
        Ok(())
    }

    /// Read streams in order, stopping at the first failing stream
    pub fn sync<F>(&mut self, streams: &[Arc<dyn Stream>], sync_mode: SyncMode, mut emit: F) -> Result<SyncStats>
    where
        F: FnMut(Message) -> Result<()>,
    {
        let start = Instant::now();
        for stream in streams {
            self.sync_stream(Arc::clone(stream), sync_mode, &mut emit)?;
        }
        self.stats.set_duration(start.elapsed().as_millis() as u64);
        info!(
            "Sync finished: {} streams, {} records",
            self.stats.streams_synced, self.stats.records_synced
        );
        Ok(self.stats.clone())
    }

    /// Read streams and collect every message
    pub fn sync_collect(&mut self, streams: &[Arc<dyn Stream>], sync_mode: SyncMode) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        self.sync(streams, sync_mode, |message| {
            messages.push(message);
            Ok(())
        })?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests;
