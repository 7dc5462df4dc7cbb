//! Checkpointing and message assembly
//!
//! Shared by the sequential and concurrent reads: every record and slice
//! boundary passes through [`ReadProgress`] on the consuming thread, which
//! is the only place cursor state is mutated.

use super::types::{Message, ReadConfig, StreamStatus, SyncStats};
use crate::cursor::{Record, StreamSlice};
use crate::error::{Error, Result};
use crate::incremental::StreamCursor;
use crate::types::{JsonObject, SyncMode};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Counts records since the last checkpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointTracker {
    interval: usize,
    since_last: usize,
}

impl CheckpointTracker {
    /// Checkpoint every `interval` records; 0 disables intermediate checkpoints
    pub fn new(interval: usize) -> Self {
        Self {
            interval,
            since_last: 0,
        }
    }

    /// Count one observed record. Returns `true` when a checkpoint is due,
    /// and starts a new interval.
    pub fn record_observed(&mut self) -> bool {
        if self.interval == 0 {
            return false;
        }
        self.since_last += 1;
        if self.since_last >= self.interval {
            self.since_last = 0;
            return true;
        }
        false
    }

    /// Records observed since the last checkpoint
    pub fn pending(&self) -> usize {
        self.since_last
    }

    /// Start a new interval
    pub fn reset(&mut self) {
        self.since_last = 0;
    }
}

/// Consuming-side state of one stream read
pub(crate) struct ReadProgress {
    stream: String,
    cursor: Arc<dyn StreamCursor>,
    sync_mode: SyncMode,
    tracker: CheckpointTracker,
    stats: SyncStats,
    pending: VecDeque<Message>,
    started: Instant,
}

impl ReadProgress {
    pub(crate) fn new(
        stream: &str,
        cursor: Arc<dyn StreamCursor>,
        sync_mode: SyncMode,
        config: &ReadConfig,
    ) -> Self {
        Self {
            stream: stream.to_string(),
            cursor,
            sync_mode,
            tracker: CheckpointTracker::new(config.checkpoint_interval),
            stats: SyncStats::new(),
            pending: VecDeque::new(),
            started: Instant::now(),
        }
    }

    pub(crate) fn start(&mut self) {
        info!("Starting {:?} read of stream {}", self.sync_mode, self.stream);
        self.started = Instant::now();
        self.pending
            .push_back(Message::status(&self.stream, StreamStatus::Started));
    }

    /// Observe a record and queue it, followed by a checkpoint when one is due
    pub(crate) fn on_record(&mut self, slice: StreamSlice, data: JsonObject) -> Result<()> {
        let record = Record::new(&self.stream, data, slice);
        let incremental = self.sync_mode.is_incremental();

        if incremental && !self.cursor.should_be_synced(&record) {
            self.stats.add_skipped();
            return Ok(());
        }

        self.cursor.observe(&record)?;
        self.stats.add_record();
        self.pending.push_back(Message::Record(record));

        if incremental && self.tracker.record_observed() {
            self.checkpoint(self.cursor.get_updated_state());
        }
        Ok(())
    }

    pub(crate) fn on_slice_closed(&mut self, slice: &StreamSlice) -> Result<()> {
        self.cursor.close_slice(slice)?;
        self.stats.add_slice();
        Ok(())
    }

    /// Queue the final state and the completion status
    pub(crate) fn finish(&mut self) {
        self.checkpoint(self.cursor.get_stream_state());
        self.pending
            .push_back(Message::status(&self.stream, StreamStatus::Complete));
        self.stats.add_stream();
        self.stats
            .set_duration(self.started.elapsed().as_millis() as u64);
        info!(
            "Completed stream {}: {} records, {} slices",
            self.stream, self.stats.records_synced, self.stats.slices_closed
        );
    }

    /// Record a fatal error; nothing queued after it is delivered
    pub(crate) fn fail(&mut self, err: &Error) {
        error!("Stream {} failed: {err}", self.stream);
        self.stats.add_error();
        self.pending.clear();
        self.stats
            .set_duration(self.started.elapsed().as_millis() as u64);
    }

    pub(crate) fn pop(&mut self) -> Option<Message> {
        self.pending.pop_front()
    }

    pub(crate) fn stats(&self) -> &SyncStats {
        &self.stats
    }

    fn checkpoint(&mut self, data: crate::types::JsonValue) {
        self.tracker.reset();
        self.stats.add_checkpoint();
        self.pending.push_back(Message::state(&self.stream, data));
    }
}
