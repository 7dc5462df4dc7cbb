//! Global substream cursor
//!
//! One shared leaf cursor for every partition of a substream. Progress is
//! committed once all partitions have been read; until then checkpoints
//! carry a lookback window reaching back to where this sync started, since
//! any partition not yet closed may still hold records from that point on.

use super::{SliceIter, StreamCursor};
use crate::cursor::{Cursor, CursorSlice, CursorState, PartitionKey, Record, StreamSlice};
use crate::error::{Error, Result};
use crate::partition::{PartitionIter, PartitionRouter};
use crate::state::{is_empty_state, GlobalState};
use crate::types::{JsonObject, JsonValue};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct PartitionProgress {
    open_slices: usize,
    generating: bool,
    finished: bool,
    parent_state: Option<JsonObject>,
}

struct SharedState {
    cursor: Box<dyn Cursor>,
    /// Shared cursor slices, computed once per sync and reused for every partition
    cursor_slices: Option<Vec<CursorSlice>>,
    partitions: IndexMap<String, PartitionProgress>,
    parent_state: Option<JsonObject>,
    /// Parent state at the end of enumeration, applied at the terminal point
    final_parent_state: Option<JsonObject>,
    all_generated: bool,
    terminal: bool,
    highest_observed: Option<i64>,
    lowest_observed: Option<i64>,
    /// Position the current sync's shared slices start from
    sync_start: Option<i64>,
    slices_started: bool,
}

impl SharedState {
    fn new(cursor: Box<dyn Cursor>) -> Self {
        Self {
            cursor,
            cursor_slices: None,
            partitions: IndexMap::new(),
            parent_state: None,
            final_parent_state: None,
            all_generated: false,
            terminal: false,
            highest_observed: None,
            lowest_observed: None,
            sync_start: None,
            slices_started: false,
        }
    }

    fn reset_sync(&mut self) {
        self.slices_started = true;
        self.cursor_slices = None;
        self.partitions.clear();
        self.all_generated = false;
        self.final_parent_state = None;
        self.terminal = false;
        self.highest_observed = None;
        self.lowest_observed = None;
        self.sync_start = self.cursor.start_position();
    }

    fn start_partition(&mut self, key: &str, parent_state: Option<JsonObject>) -> Vec<CursorSlice> {
        let slices = match &self.cursor_slices {
            Some(slices) => slices.clone(),
            None => {
                let slices: Vec<CursorSlice> = self.cursor.stream_slices().collect();
                self.cursor_slices = Some(slices.clone());
                slices
            }
        };
        self.partitions.insert(
            key.to_string(),
            PartitionProgress {
                generating: true,
                parent_state,
                ..PartitionProgress::default()
            },
        );
        slices
    }

    fn slice_opened(&mut self, key: &str) {
        if let Some(progress) = self.partitions.get_mut(key) {
            progress.open_slices += 1;
        }
    }

    fn partition_generated(&mut self, key: &str) -> Result<()> {
        let Some(progress) = self.partitions.get_mut(key) else {
            return Ok(());
        };
        progress.generating = false;
        if progress.open_slices == 0 {
            self.finish_partition(key)?;
        }
        Ok(())
    }

    fn generation_done(&mut self, parent_state: Option<JsonObject>) -> Result<()> {
        self.all_generated = true;
        self.final_parent_state = parent_state;
        self.check_terminal()
    }

    fn close_slice(&mut self, slice: &StreamSlice) -> Result<()> {
        let key = slice.partition.key();
        let progress = self
            .partitions
            .get_mut(&key)
            .ok_or_else(|| Error::unknown_partition(&key))?;
        progress.open_slices = progress.open_slices.saturating_sub(1);
        if progress.open_slices == 0 && !progress.generating {
            self.finish_partition(&key)?;
        }
        Ok(())
    }

    /// Later partitions overwrite the parent state, they never merge
    fn finish_partition(&mut self, key: &str) -> Result<()> {
        if let Some(progress) = self.partitions.get_mut(key) {
            progress.finished = true;
            if let Some(parent_state) = progress.parent_state.take() {
                self.parent_state = Some(parent_state);
            }
        }
        debug!("Partition {key} finished");
        self.check_terminal()
    }

    /// Commit the shared cursor once every partition has been read
    fn check_terminal(&mut self) -> Result<()> {
        if self.terminal
            || !self.all_generated
            || !self.partitions.values().all(|p| p.finished)
        {
            return Ok(());
        }
        for cursor_slice in self.cursor_slices.take().unwrap_or_default() {
            self.cursor
                .close_slice(&StreamSlice::unpartitioned(cursor_slice))?;
        }
        if let Some(parent_state) = self.final_parent_state.take() {
            self.parent_state = Some(parent_state);
        }
        self.terminal = true;
        info!(
            "All {} partitions read, shared cursor committed",
            self.partitions.len()
        );
        Ok(())
    }

    fn observe(&mut self, record: &Record) -> Result<()> {
        let key = record.slice.partition.key();
        if !self.partitions.contains_key(&key) {
            return Err(Error::unknown_partition(&key));
        }
        if let Some(position) = self.cursor.position(record) {
            self.highest_observed = Some(self.highest_observed.map_or(position, |h| h.max(position)));
            self.lowest_observed = Some(self.lowest_observed.map_or(position, |l| l.min(position)));
        }
        self.cursor.observe(&record.slice, record);
        Ok(())
    }

    /// `max(0, highest observed - start of this sync)` until the terminal point.
    ///
    /// Partitions the router has not reached yet, and open partitions whose
    /// slices are read out of order, may still produce records anywhere
    /// after the sync start, so no smaller rewind is safe.
    fn lookback_window(&self) -> u64 {
        if self.terminal {
            return 0;
        }
        let Some(highest) = self.highest_observed else {
            return 0;
        };
        self.sync_start
            .or(self.lowest_observed)
            .map_or(0, |start| highest.saturating_sub(start).max(0) as u64)
    }

    fn snapshot(&self, updated: bool) -> JsonValue {
        let (state, lookback_window) = if updated && !self.terminal {
            (self.cursor.get_updated_state(), Some(self.lookback_window()))
        } else {
            (self.cursor.get_stream_state(), self.terminal.then_some(0))
        };
        GlobalState {
            state,
            parent_state: self.parent_state.clone(),
            lookback_window,
        }
        .to_value()
    }
}

// ============================================================================
// Global Substream Cursor
// ============================================================================

/// Tracks every partition of a stream with one shared cursor.
///
/// Used when per-partition state would grow without bound. State is
/// `{state, parent_state, lookback_window}`; `lookback_window` is `0` once
/// every partition has been read.
pub struct GlobalSubstreamCursor {
    name: String,
    router: Arc<dyn PartitionRouter>,
    shared: Arc<Mutex<SharedState>>,
}

impl GlobalSubstreamCursor {
    /// Create a cursor for `stream` sharing `cursor` across the router's partitions
    pub fn new(
        stream: impl Into<String>,
        router: Arc<dyn PartitionRouter>,
        cursor: Box<dyn Cursor>,
    ) -> Self {
        Self {
            name: stream.into(),
            router,
            shared: Arc::new(Mutex::new(SharedState::new(cursor))),
        }
    }

    /// Whether every partition of the current sync has been read
    pub fn is_terminal(&self) -> bool {
        self.shared.lock().terminal
    }

    /// Current lookback window in cursor units
    pub fn lookback_window(&self) -> u64 {
        self.shared.lock().lookback_window()
    }
}

impl fmt::Debug for GlobalSubstreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalSubstreamCursor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl StreamCursor for GlobalSubstreamCursor {
    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        if is_empty_state(state) {
            return Ok(());
        }
        let parsed = GlobalState::from_value(state)?;

        if let Some(parent_state) = &parsed.parent_state {
            self.router.set_initial_state(parent_state)?;
        }

        let mut shared = self.shared.lock();
        if shared.slices_started {
            return Err(Error::cursor(format!(
                "stream {}: initial state can only be set before slices are produced",
                self.name
            )));
        }
        if !parsed.state.is_empty() {
            shared.cursor.set_initial_state(&parsed.state)?;
        }
        if let Some(lookback) = parsed.lookback_window.filter(|l| *l > 0) {
            debug!("Stream {}: rewinding shared cursor by {lookback}", self.name);
            shared.cursor.rewind(lookback);
        }
        shared.parent_state = parsed.parent_state;
        Ok(())
    }

    fn stream_slices(&self) -> Result<SliceIter> {
        self.shared.lock().reset_sync();
        let partitions = self
            .router
            .partitions()
            .map_err(|e| e.in_enumeration(&self.name))?;

        Ok(Box::new(GlobalSlices {
            name: self.name.clone(),
            router: Arc::clone(&self.router),
            shared: Arc::clone(&self.shared),
            partitions,
            current: None,
            seen: HashSet::new(),
            done: false,
        }))
    }

    fn observe(&self, record: &Record) -> Result<()> {
        self.shared.lock().observe(record)
    }

    fn close_slice(&self, slice: &StreamSlice) -> Result<()> {
        self.shared.lock().close_slice(slice)
    }

    fn get_stream_state(&self) -> JsonValue {
        self.shared.lock().snapshot(false)
    }

    fn get_updated_state(&self) -> JsonValue {
        self.shared.lock().snapshot(true)
    }

    fn select_state(&self, _slice: &StreamSlice) -> Option<CursorState> {
        let state = self.shared.lock().cursor.get_stream_state();
        (!state.is_empty()).then_some(state)
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        self.shared.lock().cursor.should_be_synced(record)
    }
}

// ============================================================================
// Slice Enumeration
// ============================================================================

struct Generating {
    partition: PartitionKey,
    key: String,
    slices: std::vec::IntoIter<CursorSlice>,
}

/// Pairs every partition with the shared cursor's slices
struct GlobalSlices {
    name: String,
    router: Arc<dyn PartitionRouter>,
    shared: Arc<Mutex<SharedState>>,
    partitions: PartitionIter,
    current: Option<Generating>,
    seen: HashSet<String>,
    done: bool,
}

impl Iterator for GlobalSlices {
    type Item = Result<StreamSlice>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(current) = self.current.as_mut() {
                if let Some(cursor_slice) = current.slices.next() {
                    self.shared.lock().slice_opened(&current.key);
                    return Some(Ok(StreamSlice::new(
                        current.partition.clone(),
                        cursor_slice,
                    )));
                }
                let generated = self.shared.lock().partition_generated(&current.key);
                self.current = None;
                if let Err(e) = generated {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            let partition = match self.partitions.next() {
                None => {
                    self.done = true;
                    let parent_state = self.router.get_stream_state();
                    return self.shared.lock().generation_done(parent_state).err().map(Err);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.in_enumeration(&self.name)));
                }
                Some(Ok(partition)) => partition,
            };

            let key = partition.key();
            if !self.seen.insert(key.clone()) {
                continue;
            }

            let parent_state = self.router.get_stream_state();
            let slices = self.shared.lock().start_partition(&key, parent_state);
            debug!(
                "Stream {}: partition {key} gets {} shared slices",
                self.name,
                slices.len()
            );
            self.current = Some(Generating {
                partition,
                key,
                slices: slices.into_iter(),
            });
        }
    }
}
