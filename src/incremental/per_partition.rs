//! Per-partition cursor
//!
//! Keeps one leaf cursor per partition key and serializes them as a
//! bounded `{states: [...]}` table.

use super::{SliceIter, StreamCursor};
use crate::cursor::{
    CursorFactory, Cursor, CursorSliceIter, CursorState, PartitionKey, Record, StreamSlice,
};
use crate::error::{Error, Result};
use crate::partition::{PartitionIter, PartitionRouter};
use crate::state::{is_empty_state, PartitionStateEntry, PerPartitionState};
use crate::types::{JsonObject, JsonValue};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default ceiling on tracked partitions
pub const DEFAULT_MAX_PARTITIONS: usize = 10_000;

// ============================================================================
// Partition Table
// ============================================================================

struct PartitionEntry {
    partition: PartitionKey,
    cursor: Box<dyn Cursor>,
    /// Slices yielded but not yet closed
    open_slices: usize,
    /// Cursor slices are still being enumerated
    generating: bool,
    /// Parent state captured when the partition was enumerated
    parent_state: Option<JsonObject>,
}

impl PartitionEntry {
    fn new(partition: PartitionKey, cursor: Box<dyn Cursor>) -> Self {
        Self {
            partition,
            cursor,
            open_slices: 0,
            generating: false,
            parent_state: None,
        }
    }

    fn is_idle(&self) -> bool {
        !self.generating && self.open_slices == 0
    }
}

/// Partition entries in least-recently-touched order
struct PartitionTable {
    entries: IndexMap<String, PartitionEntry>,
    parent_state: Option<JsonObject>,
    /// Parent state at the end of enumeration, applied once every partition is idle
    final_parent_state: Option<JsonObject>,
    /// Starting state for partitions without an entry of their own
    global: Option<CursorState>,
    global_position: Option<i64>,
    /// Furthest committed partition state of the current sync
    candidate: Option<(i64, CursorState)>,
    max_partitions: usize,
    global_cursor_limit: Option<usize>,
    use_global_cursor: bool,
    /// Partitions created or seeded so far
    partitions_seen: usize,
    enumeration_done: bool,
    slices_started: bool,
}

impl PartitionTable {
    fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            parent_state: None,
            final_parent_state: None,
            global: None,
            global_position: None,
            candidate: None,
            max_partitions: DEFAULT_MAX_PARTITIONS,
            global_cursor_limit: None,
            use_global_cursor: false,
            partitions_seen: 0,
            enumeration_done: false,
            slices_started: false,
        }
    }

    fn start_sync(&mut self) {
        self.slices_started = true;
        self.enumeration_done = false;
        self.final_parent_state = None;
        self.candidate = None;
    }

    /// Move an entry to the most-recent end
    fn touch(&mut self, key: &str) {
        if let Some(entry) = self.entries.shift_remove(key) {
            self.entries.insert(key.to_string(), entry);
        }
    }

    /// Drop the oldest idle entries until the table fits. Partitions with
    /// open slices are never dropped.
    fn evict(&mut self) {
        while self.entries.len() > self.max_partitions {
            let Some(index) = self.entries.values().position(PartitionEntry::is_idle) else {
                break;
            };
            if let Some((key, _)) = self.entries.shift_remove_index(index) {
                warn!(
                    "Evicting partition {key}: more than {} partitions tracked",
                    self.max_partitions
                );
            }
        }
    }

    fn count_partition(&mut self) {
        self.partitions_seen += 1;
        let Some(limit) = self.global_cursor_limit else {
            return;
        };
        if !self.use_global_cursor && self.partitions_seen > limit {
            info!("More than {limit} partitions seen, keeping only the fallback state");
            self.use_global_cursor = true;
        }
    }

    /// New partitions start where the fallback state left off
    fn create_cursor(&mut self, factory: &dyn CursorFactory) -> Result<Box<dyn Cursor>> {
        let mut cursor = factory.create_cursor()?;
        if let Some(global) = &self.global {
            cursor.set_initial_state(global)?;
        }
        self.count_partition();
        Ok(cursor)
    }

    fn start_partition(
        &mut self,
        partition: &PartitionKey,
        key: &str,
        factory: &dyn CursorFactory,
        parent_state: Option<JsonObject>,
    ) -> Result<CursorSliceIter> {
        if self.entries.contains_key(key) {
            self.touch(key);
        } else {
            let cursor = self.create_cursor(factory)?;
            self.entries
                .insert(key.to_string(), PartitionEntry::new(partition.clone(), cursor));
        }

        let entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| Error::unknown_partition(key))?;
        entry.generating = true;
        entry.parent_state = parent_state;
        let slices = entry.cursor.stream_slices();

        self.evict();
        Ok(slices)
    }

    fn slice_opened(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.open_slices += 1;
        }
    }

    fn partition_generated(&mut self, key: &str) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        entry.generating = false;
        if entry.open_slices == 0 {
            self.partition_finished(key);
        }
        self.evict();
    }

    fn close_slice(&mut self, slice: &StreamSlice) -> Result<()> {
        let key = slice.partition.key();
        let entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| Error::unknown_partition(&key))?;

        entry.cursor.close_slice(slice)?;
        entry.open_slices = entry.open_slices.saturating_sub(1);
        if entry.is_idle() {
            self.partition_finished(&key);
        }
        self.touch(&key);
        self.evict();
        Ok(())
    }

    /// The most recently finished partition decides the parent state
    fn partition_finished(&mut self, key: &str) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        debug!("Partition {key} finished");
        if let Some(parent_state) = entry.parent_state.take() {
            self.parent_state = Some(parent_state);
        }
        if let Some(position) = entry.cursor.committed_position() {
            if self.candidate.as_ref().map_or(true, |(best, _)| position > *best) {
                self.candidate = Some((position, entry.cursor.get_stream_state()));
            }
        }
        self.try_complete();
    }

    fn enumeration_done(&mut self, parent_state: Option<JsonObject>) {
        self.enumeration_done = true;
        self.final_parent_state = parent_state;
        self.try_complete();
    }

    /// Commit the fallback state and the final parent state once enumeration
    /// is over and every partition is idle
    fn try_complete(&mut self) {
        if !self.enumeration_done || !self.entries.values().all(PartitionEntry::is_idle) {
            return;
        }
        if let Some((position, state)) = self.candidate.take() {
            if self.global_position.map_or(true, |current| position > current) {
                self.global = Some(state);
                self.global_position = Some(position);
            }
        }
        if let Some(parent_state) = self.final_parent_state.take() {
            self.parent_state = Some(parent_state);
        }
    }

    fn snapshot(&self, updated: bool) -> JsonValue {
        let states: Vec<PartitionStateEntry> = if self.use_global_cursor {
            Vec::new()
        } else {
            self.entries
                .values()
                .filter_map(|entry| {
                    let cursor = if updated {
                        entry.cursor.get_updated_state()
                    } else {
                        entry.cursor.get_stream_state()
                    };
                    (!cursor.is_empty()).then(|| PartitionStateEntry {
                        partition: entry.partition.clone(),
                        cursor,
                    })
                })
                .collect()
        };

        let skip = states.len().saturating_sub(self.max_partitions);
        PerPartitionState {
            states: states.into_iter().skip(skip).collect(),
            state: self.global.clone(),
            use_global_cursor: self.use_global_cursor,
            parent_state: self.parent_state.clone(),
        }
        .to_value()
    }
}

// ============================================================================
// Per-Partition Cursor
// ============================================================================

/// Maintains one independent cursor per partition behind a single
/// serializable state.
///
/// Cursors are created through the factory the first time a partition is
/// enumerated (or seeded from the incoming state table). When more than
/// `max_partitions` partitions are tracked, the least recently touched
/// idle partitions are dropped.
///
/// Alongside the table the state carries a fallback `state`: the furthest
/// value any partition committed in the last completed sync. Partitions
/// without an entry, whether new or evicted, start from it. Records older
/// than the fallback in a partition that has never been synced are not read.
pub struct PerPartitionCursor {
    name: String,
    router: Arc<dyn PartitionRouter>,
    factory: Arc<dyn CursorFactory>,
    table: Arc<Mutex<PartitionTable>>,
}

impl PerPartitionCursor {
    /// Create a cursor for `stream` over the router's partitions
    pub fn new(
        stream: impl Into<String>,
        router: Arc<dyn PartitionRouter>,
        factory: Arc<dyn CursorFactory>,
    ) -> Self {
        Self {
            name: stream.into(),
            router,
            factory,
            table: Arc::new(Mutex::new(PartitionTable::new())),
        }
    }

    /// Set the partition ceiling
    #[must_use]
    pub fn with_max_partitions(self, max_partitions: usize) -> Self {
        self.table.lock().max_partitions = max_partitions.max(1);
        self
    }

    /// Keep only the fallback state once more than `limit` partitions are seen
    #[must_use]
    pub fn with_global_cursor_limit(self, limit: usize) -> Self {
        self.table.lock().global_cursor_limit = Some(limit);
        self
    }

    /// Whether the per-partition table has been given up for the fallback state
    pub fn uses_global_cursor(&self) -> bool {
        self.table.lock().use_global_cursor
    }

    /// Partition ceiling
    pub fn max_partitions(&self) -> usize {
        self.table.lock().max_partitions
    }

    /// Number of partitions currently tracked in memory
    pub fn partition_count(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Load a `{states: [...], state?, use_global_cursor?, parent_state?}` table.
    ///
    /// Any other shape, including a bare `{<cursor_field>: value}` mapping,
    /// is rejected.
    pub fn update_cursor(&self, state: &JsonValue) -> Result<()> {
        if is_empty_state(state) {
            return Ok(());
        }
        if state.get("states").is_none() {
            return Err(Error::invalid_state(format!(
                "stream {} is partitioned and expects {{states: [...]}}, got {state}",
                self.name
            )));
        }
        let parsed = PerPartitionState::from_value(state)?;

        let mut seeded = Vec::with_capacity(parsed.states.len());
        for entry in parsed.states {
            let mut cursor = self.factory.create_cursor()?;
            cursor.set_initial_state(&entry.cursor)?;
            seeded.push((entry.partition, cursor));
        }
        let global_position = match &parsed.state {
            Some(state) => {
                let mut cursor = self.factory.create_cursor()?;
                cursor.set_initial_state(state)?;
                cursor.committed_position()
            }
            None => None,
        };

        if let Some(parent_state) = &parsed.parent_state {
            self.router.set_initial_state(parent_state)?;
        }

        let mut table = self.table.lock();
        if table.slices_started {
            return Err(Error::cursor(format!(
                "stream {}: initial state can only be set before slices are produced",
                self.name
            )));
        }
        table.use_global_cursor |= parsed.use_global_cursor;
        for (partition, cursor) in seeded {
            table
                .entries
                .insert(partition.key(), PartitionEntry::new(partition, cursor));
            table.count_partition();
        }
        table.global = parsed.state;
        table.global_position = global_position;
        table.parent_state = parsed.parent_state;
        table.evict();
        debug!(
            "Stream {} seeded with {} partitions",
            self.name,
            table.entries.len()
        );
        Ok(())
    }
}

impl fmt::Debug for PerPartitionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerPartitionCursor")
            .field("name", &self.name)
            .field("partitions", &self.partition_count())
            .finish_non_exhaustive()
    }
}

impl StreamCursor for PerPartitionCursor {
    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        self.update_cursor(state)
    }

    fn stream_slices(&self) -> Result<SliceIter> {
        self.table.lock().start_sync();
        let partitions = self
            .router
            .partitions()
            .map_err(|e| e.in_enumeration(&self.name))?;

        Ok(Box::new(PerPartitionSlices {
            name: self.name.clone(),
            router: Arc::clone(&self.router),
            factory: Arc::clone(&self.factory),
            table: Arc::clone(&self.table),
            partitions,
            current: None,
            seen: HashSet::new(),
            done: false,
        }))
    }

    fn observe(&self, record: &Record) -> Result<()> {
        let key = record.slice.partition.key();
        let mut table = self.table.lock();
        let entry = table
            .entries
            .get_mut(&key)
            .ok_or_else(|| Error::unknown_partition(&key))?;
        entry.cursor.observe(&record.slice, record);
        Ok(())
    }

    fn close_slice(&self, slice: &StreamSlice) -> Result<()> {
        self.table.lock().close_slice(slice)
    }

    fn get_stream_state(&self) -> JsonValue {
        self.table.lock().snapshot(false)
    }

    fn get_updated_state(&self) -> JsonValue {
        self.table.lock().snapshot(true)
    }

    fn select_state(&self, slice: &StreamSlice) -> Option<CursorState> {
        let table = self.table.lock();
        let state = table
            .entries
            .get(&slice.partition.key())?
            .cursor
            .get_stream_state();
        (!state.is_empty()).then_some(state)
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        let table = self.table.lock();
        table
            .entries
            .get(&record.slice.partition.key())
            .map_or(true, |entry| entry.cursor.should_be_synced(record))
    }
}

// ============================================================================
// Slice Enumeration
// ============================================================================

struct Generating {
    partition: PartitionKey,
    key: String,
    slices: CursorSliceIter,
}

/// Walks partitions in router order, yielding each partition's cursor slices
struct PerPartitionSlices {
    name: String,
    router: Arc<dyn PartitionRouter>,
    factory: Arc<dyn CursorFactory>,
    table: Arc<Mutex<PartitionTable>>,
    partitions: PartitionIter,
    current: Option<Generating>,
    seen: HashSet<String>,
    done: bool,
}

impl PerPartitionSlices {
    fn fail(&mut self, err: Error) -> Error {
        self.done = true;
        err
    }
}

impl Iterator for PerPartitionSlices {
    type Item = Result<StreamSlice>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(current) = self.current.as_mut() {
                if let Some(cursor_slice) = current.slices.next() {
                    self.table.lock().slice_opened(&current.key);
                    return Some(Ok(StreamSlice::new(
                        current.partition.clone(),
                        cursor_slice,
                    )));
                }
                self.table.lock().partition_generated(&current.key);
                self.current = None;
            }

            let partition = match self.partitions.next() {
                None => {
                    self.done = true;
                    let parent_state = self.router.get_stream_state();
                    self.table.lock().enumeration_done(parent_state);
                    return None;
                }
                Some(Err(e)) => {
                    let err = e.in_enumeration(&self.name);
                    return Some(Err(self.fail(err)));
                }
                Some(Ok(partition)) => partition,
            };

            let key = partition.key();
            if !self.seen.insert(key.clone()) {
                debug!("Stream {}: partition {key} already enumerated", self.name);
                continue;
            }

            debug!("Stream {}: generating slices for partition {key}", self.name);
            let parent_state = self.router.get_stream_state();
            let started = self.table.lock().start_partition(
                &partition,
                &key,
                self.factory.as_ref(),
                parent_state,
            );
            match started {
                Ok(slices) => {
                    self.current = Some(Generating {
                        partition,
                        key,
                        slices,
                    });
                }
                Err(e) => return Some(Err(self.fail(e))),
            }
        }
    }
}
