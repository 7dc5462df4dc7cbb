//! Engine types
//!
//! Message types and configuration for the read engine.

use crate::cursor::Record;
use crate::types::JsonValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle status of a stream within a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Reading has started
    Started,
    /// Every slice has been read and the final state emitted
    Complete,
}

/// A message emitted during sync
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A record, tagged with the slice it came from
    Record(Record),
    /// State snapshot
    State {
        /// Stream name
        stream: String,
        /// State in the stream cursor's shape
        data: JsonValue,
    },
    /// Stream status
    Status {
        /// Stream name
        stream: String,
        /// Status
        status: StreamStatus,
    },
}

impl Message {
    /// Create a state message
    pub fn state(stream: impl Into<String>, data: JsonValue) -> Self {
        Self::State {
            stream: stream.into(),
            data,
        }
    }

    /// Create a status message
    pub fn status(stream: impl Into<String>, status: StreamStatus) -> Self {
        Self::Status {
            stream: stream.into(),
            status,
        }
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// Check if this is a state message
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State { .. })
    }

    /// Check if this is a status message
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status { .. })
    }

    /// Stream the message belongs to
    pub fn stream(&self) -> &str {
        match self {
            Self::Record(record) => &record.stream,
            Self::State { stream, .. } | Self::Status { stream, .. } => stream,
        }
    }
}

// ============================================================================
// Read Configuration
// ============================================================================

/// Configuration for reading a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadConfig {
    /// Worker threads; 1 reads sequentially in the caller's thread
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Slices queued for workers before the producer blocks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Records buffered for the consuming iterator before the consumer blocks
    #[serde(default = "default_result_capacity")]
    pub result_capacity: usize,

    /// Records between intermediate state snapshots (incremental only, 0 disables)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Bounded wait before re-checking cancellation
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Retries of a retryable retrieval error before any record was read
    #[serde(default)]
    pub max_retries: u32,

    /// Pause between retries
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_result_capacity() -> usize {
    1000
}

fn default_checkpoint_interval() -> usize {
    1000
}

fn default_poll_timeout_ms() -> u64 {
    50
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            result_capacity: default_result_capacity(),
            checkpoint_interval: default_checkpoint_interval(),
            poll_timeout_ms: default_poll_timeout_ms(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl ReadConfig {
    /// Create a new read config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read in the caller's thread
    #[must_use]
    pub fn sequential() -> Self {
        Self::default().with_concurrency(1)
    }

    /// Set worker thread count
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set work channel capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set result channel capacity
    #[must_use]
    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity.max(1);
        self
    }

    /// Set checkpoint interval
    #[must_use]
    pub fn with_checkpoint_interval(mut self, records: usize) -> Self {
        self.checkpoint_interval = records;
        self
    }

    /// Set poll timeout
    #[must_use]
    pub fn with_poll_timeout_ms(mut self, ms: u64) -> Self {
        self.poll_timeout_ms = ms.max(1);
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Whether reads use worker threads
    pub fn is_concurrent(&self) -> bool {
        self.concurrency > 1
    }

    /// Poll timeout as a duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }

    /// Retry backoff as a duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Statistics from a sync operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Records emitted
    pub records_synced: usize,
    /// Records dropped because the cursor had already synced them
    pub records_skipped: usize,
    /// Slices closed
    pub slices_closed: usize,
    /// State messages emitted (intermediate and final)
    pub checkpoints: usize,
    /// Streams read to completion
    pub streams_synced: usize,
    /// Streams skipped as unavailable
    pub streams_skipped: usize,
    /// Errors encountered
    pub errors: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record
    pub fn add_record(&mut self) {
        self.records_synced += 1;
    }

    /// Add a skipped record
    pub fn add_skipped(&mut self) {
        self.records_skipped += 1;
    }

    /// Add a closed slice
    pub fn add_slice(&mut self) {
        self.slices_closed += 1;
    }

    /// Add a checkpoint
    pub fn add_checkpoint(&mut self) {
        self.checkpoints += 1;
    }

    /// Add a stream
    pub fn add_stream(&mut self) {
        self.streams_synced += 1;
    }

    /// Add a skipped stream
    pub fn add_skipped_stream(&mut self) {
        self.streams_skipped += 1;
    }

    /// Add an error
    pub fn add_error(&mut self) {
        self.errors += 1;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }

    /// Fold another stream's counters into these
    pub fn merge(&mut self, other: &SyncStats) {
        self.records_synced += other.records_synced;
        self.records_skipped += other.records_skipped;
        self.slices_closed += other.slices_closed;
        self.checkpoints += other.checkpoints;
        self.streams_synced += other.streams_synced;
        self.streams_skipped += other.streams_skipped;
        self.errors += other.errors;
    }
}
