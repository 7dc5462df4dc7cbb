//! Sequential stream read
//!
//! Same message contract as [`super::ConcurrentRead`], driven entirely in
//! the caller's thread.

use super::checkpoint::ReadProgress;
use super::retry::RetryPolicy;
use super::types::{Message, ReadConfig, SyncStats};
use crate::cursor::StreamSlice;
use crate::error::{Error, Result};
use crate::incremental::SliceIter;
use crate::stream::{RecordIter, Stream};
use crate::types::SyncMode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// The slice currently being read
struct OpenSlice {
    slice: StreamSlice,
    records: RecordIter,
    forwarded: usize,
    attempt: u32,
}

/// Reads a stream slice by slice in the caller's thread
pub struct SequentialRead {
    stream: Arc<dyn Stream>,
    sync_mode: SyncMode,
    progress: ReadProgress,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
    slices: Option<SliceIter>,
    current: Option<OpenSlice>,
    finished: bool,
}

impl SequentialRead {
    /// Prepare a read; nothing happens until the first call to `next`
    pub fn new(stream: Arc<dyn Stream>, sync_mode: SyncMode, config: &ReadConfig) -> Self {
        let progress = ReadProgress::new(stream.name(), stream.cursor(), sync_mode, config);
        Self {
            stream,
            sync_mode,
            progress,
            retry: RetryPolicy::from_config(config),
            cancel: Arc::new(AtomicBool::new(false)),
            slices: None,
            current: None,
            finished: false,
        }
    }

    /// Use an externally owned cancellation flag
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the read when raised
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Statistics so far
    pub fn stats(&self) -> &SyncStats {
        self.progress.stats()
    }

    fn abort(&mut self, err: Error) -> Error {
        self.progress.fail(&err);
        self.finished = true;
        self.current = None;
        self.slices = None;
        err
    }

    fn open(&self, slice: StreamSlice, attempt: u32) -> Result<OpenSlice> {
        let mut attempt = attempt;
        loop {
            match self.stream.read_slice(&slice, self.sync_mode) {
                Ok(records) => {
                    return Ok(OpenSlice {
                        slice,
                        records,
                        forwarded: 0,
                        attempt,
                    })
                }
                Err(e) if self.retry.allows(&e, 0, attempt) => {
                    attempt += 1;
                    self.wait_before_retry(&slice, attempt, &e)?;
                }
                Err(e) => return Err(e.in_slice(self.stream.name(), &slice.describe())),
            }
        }
    }

    fn wait_before_retry(&self, slice: &StreamSlice, attempt: u32, err: &Error) -> Result<()> {
        warn!(
            "Retrying {} slice {} (attempt {attempt}): {err}",
            self.stream.name(),
            slice.describe()
        );
        if self.retry.pause(&self.cancel) {
            Ok(())
        } else {
            Err(Error::cancelled(self.stream.name()))
        }
    }

    /// Advance the open slice by one record
    fn step(&mut self) -> Result<()> {
        let Some(mut open) = self.current.take() else {
            return Ok(());
        };

        match open.records.next() {
            Some(Ok(data)) => {
                open.forwarded += 1;
                let slice = open.slice.clone();
                self.current = Some(open);
                self.progress.on_record(slice, data)
            }
            Some(Err(e)) if self.retry.allows(&e, open.forwarded, open.attempt) => {
                let attempt = open.attempt + 1;
                self.wait_before_retry(&open.slice, attempt, &e)?;
                self.current = Some(self.open(open.slice, attempt)?);
                Ok(())
            }
            Some(Err(e)) => Err(e.in_slice(self.stream.name(), &open.slice.describe())),
            None => self.progress.on_slice_closed(&open.slice),
        }
    }

    /// Open the next slice, or finish when there is none
    fn advance(&mut self) -> Result<()> {
        let next = match self.slices.as_mut() {
            Some(slices) => slices.next(),
            None => {
                self.slices = Some(self.stream.generate_slices()?);
                return Ok(());
            }
        };

        match next {
            Some(slice) => {
                self.current = Some(self.open(slice?, 0)?);
            }
            None => {
                self.progress.finish();
                self.finished = true;
            }
        }
        Ok(())
    }
}

impl Iterator for SequentialRead {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.progress.pop() {
                return Some(Ok(message));
            }
            if self.finished {
                return None;
            }
            if self.slices.is_none() && self.current.is_none() {
                self.progress.start();
            }
            if self.cancel.load(Ordering::Acquire) {
                let err = Error::cancelled(self.stream.name());
                return Some(Err(self.abort(err)));
            }

            let result = if self.current.is_some() {
                self.step()
            } else {
                self.advance()
            };
            if let Err(e) = result {
                return Some(Err(self.abort(e)));
            }
        }
    }
}
