//! Concurrent stream read
//!
//! One producer enumerates slices, a fixed pool of workers reads them, and
//! one consumer re-linearizes their records in slice-submission order:
//!
//! ```text
//! producer --ticket--> ordering channel --> consumer --> result queue --> iterator
//!          --unit----> work channel (bounded) --> workers --per-slice channel--^
//! ```
//!
//! Every blocking call waits at most `poll_timeout_ms` before re-checking
//! the shared cancellation flag.

use super::checkpoint::ReadProgress;
use super::queue::{QueueItem, ResultQueue};
use super::retry::RetryPolicy;
use super::types::{Message, ReadConfig, SyncStats};
use crate::cursor::StreamSlice;
use crate::error::{Error, Result};
use crate::stream::Stream;
use crate::types::{JsonObject, SyncMode};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Output of a worker for one slice
enum SliceItem {
    Record(JsonObject),
    Done,
}

/// A slice handed to a worker, with the channel dedicated to its records
struct WorkUnit {
    slice: StreamSlice,
    records: Sender<SliceItem>,
}

/// Submission-order marker for the consumer
struct Ticket {
    slice: StreamSlice,
    records: Receiver<SliceItem>,
}

/// State shared by the producer, workers, and consumer
struct ReadContext {
    stream: Arc<dyn Stream>,
    sync_mode: SyncMode,
    queue: Arc<ResultQueue>,
    cancel: Arc<AtomicBool>,
    poll: Duration,
    retry: RetryPolicy,
}

impl ReadContext {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Report a fatal error ahead of any queued record, then stop every thread
    fn fail(&self, err: Error) {
        warn!("Stopping read of {}: {err}", self.stream.name());
        self.queue.push(QueueItem::Error(err), &self.cancel, self.poll);
        self.cancel.store(true, Ordering::Release);
    }

    fn push(&self, item: QueueItem) -> bool {
        self.queue.push(item, &self.cancel, self.poll)
    }

    // ------------------------------------------------------------------------
    // Producer
    // ------------------------------------------------------------------------

    fn run_producer(&self, work: &Sender<WorkUnit>, order: &Sender<Ticket>) {
        let slices = match self.stream.generate_slices() {
            Ok(slices) => slices,
            Err(e) => return self.fail(e),
        };

        for slice in slices {
            if self.is_cancelled() {
                return;
            }
            let slice = match slice {
                Ok(slice) => slice,
                Err(e) => return self.fail(e),
            };

            let (records_tx, records_rx) = channel::unbounded();
            let ticket = Ticket {
                slice: slice.clone(),
                records: records_rx,
            };
            if order.send(ticket).is_err() {
                return;
            }

            let mut unit = WorkUnit {
                slice,
                records: records_tx,
            };
            loop {
                match work.send_timeout(unit, self.poll) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Timeout(returned)) => {
                        if self.is_cancelled() {
                            return;
                        }
                        unit = returned;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return,
                }
            }
        }
        debug!("All slices of {} submitted", self.stream.name());
    }

    // ------------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------------

    fn run_worker(&self, work: &Receiver<WorkUnit>) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let unit = match work.recv_timeout(self.poll) {
                Ok(unit) => unit,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.read_unit(&unit)));
            match outcome {
                Ok(Ok(())) => {
                    // The consumer may already be gone after a cancellation
                    let _ = unit.records.send(SliceItem::Done);
                }
                Ok(Err(Error::Cancelled { .. })) => return,
                Ok(Err(e)) => return self.fail(e),
                Err(_) => {
                    return self.fail(Error::WorkerPanic {
                        stream: self.stream.name().to_string(),
                    })
                }
            }
        }
    }

    fn read_unit(&self, unit: &WorkUnit) -> Result<()> {
        let mut attempt = 0;
        loop {
            let mut forwarded = 0;
            match self.forward_records(unit, &mut forwarded) {
                Ok(()) => return Ok(()),
                Err(e) if self.retry.allows(&e, forwarded, attempt) => {
                    attempt += 1;
                    warn!(
                        "Retrying {} slice {} (attempt {attempt}): {e}",
                        self.stream.name(),
                        unit.slice.describe()
                    );
                    if !self.retry.pause(&self.cancel) {
                        return Err(Error::cancelled(self.stream.name()));
                    }
                }
                Err(e) => return Err(e.in_slice(self.stream.name(), &unit.slice.describe())),
            }
        }
    }

    fn forward_records(&self, unit: &WorkUnit, forwarded: &mut usize) -> Result<()> {
        let records = self.stream.read_slice(&unit.slice, self.sync_mode)?;
        for record in records {
            if self.is_cancelled() {
                return Err(Error::cancelled(self.stream.name()));
            }
            let record = record?;
            if unit.records.send(SliceItem::Record(record)).is_err() {
                return Err(Error::cancelled(self.stream.name()));
            }
            *forwarded += 1;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Consumer
    // ------------------------------------------------------------------------

    fn run_consumer(&self, order: &Receiver<Ticket>) {
        loop {
            let ticket = match order.recv_timeout(self.poll) {
                Ok(ticket) => ticket,
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_cancelled() {
                        return;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if !self.drain_slice(&ticket) {
                return;
            }
        }

        if !self.is_cancelled() {
            self.push(QueueItem::Done);
        }
    }

    /// Forward one slice's records in order. Returns `false` if the slice
    /// was abandoned.
    fn drain_slice(&self, ticket: &Ticket) -> bool {
        loop {
            match ticket.records.recv_timeout(self.poll) {
                Ok(SliceItem::Record(data)) => {
                    if !self.push(QueueItem::Record(ticket.slice.clone(), data)) {
                        return false;
                    }
                }
                Ok(SliceItem::Done) => {
                    return self.push(QueueItem::SliceClosed(ticket.slice.clone()));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_cancelled() {
                        return false;
                    }
                }
                // The worker stopped without finishing the slice
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

// ============================================================================
// Concurrent Read
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Finished,
}

/// Reads a stream with a pool of worker threads.
///
/// The iterator yields `Status(Started)`, the records in slice-submission
/// order interleaved with intermediate `State` checkpoints, the final
/// `State`, and `Status(Complete)`. The first error ends the iteration.
/// Dropping the iterator cancels and joins every thread.
pub struct ConcurrentRead {
    context: Arc<ReadContext>,
    config: ReadConfig,
    progress: ReadProgress,
    handles: Vec<JoinHandle<()>>,
    phase: Phase,
}

impl ConcurrentRead {
    /// Prepare a read; threads start on the first call to `next`
    pub fn new(stream: Arc<dyn Stream>, sync_mode: SyncMode, config: ReadConfig) -> Self {
        let progress = ReadProgress::new(stream.name(), stream.cursor(), sync_mode, &config);
        let context = Arc::new(ReadContext {
            stream,
            sync_mode,
            queue: Arc::new(ResultQueue::new(config.result_capacity)),
            cancel: Arc::new(AtomicBool::new(false)),
            poll: config.poll_timeout(),
            retry: RetryPolicy::from_config(&config),
        });
        Self {
            context,
            config,
            progress,
            handles: Vec::new(),
            phase: Phase::Idle,
        }
    }

    /// Use an externally owned cancellation flag
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.cancel = cancel;
        }
        self
    }

    /// Flag that stops the read when raised
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.context.cancel)
    }

    /// Request every thread to stop
    pub fn cancel(&self) {
        self.context.cancel.store(true, Ordering::Release);
    }

    /// Statistics so far
    pub fn stats(&self) -> &SyncStats {
        self.progress.stats()
    }

    fn start(&mut self) -> Result<()> {
        let name = self.context.stream.name().to_string();
        let (work_tx, work_rx) = channel::bounded::<WorkUnit>(self.config.queue_capacity.max(1));
        let (order_tx, order_rx) = channel::unbounded::<Ticket>();

        let context = Arc::clone(&self.context);
        self.spawn(format!("{name}-producer"), move || {
            context.run_producer(&work_tx, &order_tx);
        })?;

        for index in 0..self.config.concurrency.max(1) {
            let context = Arc::clone(&self.context);
            let work_rx = work_rx.clone();
            self.spawn(format!("{name}-worker-{index}"), move || {
                context.run_worker(&work_rx);
            })?;
        }

        let context = Arc::clone(&self.context);
        self.spawn(format!("{name}-consumer"), move || {
            context.run_consumer(&order_rx);
        })?;

        debug!(
            "Started {} workers for stream {name}",
            self.config.concurrency.max(1)
        );
        Ok(())
    }

    fn spawn<F>(&mut self, name: String, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| Error::Other(format!("Failed to spawn thread {name}: {e}")))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Stop every thread and wait for it
    fn shutdown(&mut self) {
        self.context.cancel.store(true, Ordering::Release);
        self.join();
    }

    fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("A read thread of {} panicked", self.context.stream.name());
            }
        }
    }

    fn abort(&mut self, err: Error) -> Error {
        self.progress.fail(&err);
        self.shutdown();
        self.phase = Phase::Finished;
        err
    }

    fn handle(&mut self, item: QueueItem) -> Result<()> {
        match item {
            QueueItem::Error(e) => Err(e),
            QueueItem::Record(slice, data) => self.progress.on_record(slice, data),
            QueueItem::SliceClosed(slice) => self.progress.on_slice_closed(&slice),
            QueueItem::Done => {
                // Every thread is exiting on its own once the consumer is done
                self.join();
                self.progress.finish();
                self.phase = Phase::Finished;
                Ok(())
            }
        }
    }

    fn threads_gone(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished) && self.context.queue.is_empty()
    }
}

impl Iterator for ConcurrentRead {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.progress.pop() {
                return Some(Ok(message));
            }

            match self.phase {
                Phase::Finished => return None,
                Phase::Idle => {
                    self.progress.start();
                    self.phase = Phase::Running;
                    if let Err(e) = self.start() {
                        return Some(Err(self.abort(e)));
                    }
                }
                Phase::Running => {
                    let Some(item) = self.context.queue.pop(self.context.poll) else {
                        if self.context.is_cancelled() && self.context.queue.is_empty() {
                            let err = Error::cancelled(self.context.stream.name());
                            return Some(Err(self.abort(err)));
                        }
                        if self.threads_gone() {
                            let err = Error::WorkerPanic {
                                stream: self.context.stream.name().to_string(),
                            };
                            return Some(Err(self.abort(err)));
                        }
                        continue;
                    };
                    if let Err(e) = self.handle(item) {
                        return Some(Err(self.abort(e)));
                    }
                }
            }
        }
    }
}

impl Drop for ConcurrentRead {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}
