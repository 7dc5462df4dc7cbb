//! Priority-ordered result channel
//!
//! Items pop in `(priority, sequence)` order: errors first, then data in
//! the order it was pushed. Sequence numbers are assigned at push time, so
//! the done marker pushed last always sorts after every record.

use crate::cursor::StreamSlice;
use crate::error::Error;
use crate::types::JsonObject;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

/// An item travelling from the read threads to the consuming iterator
#[derive(Debug)]
pub enum QueueItem {
    /// Fatal error from any thread
    Error(Error),
    /// A record read from `slice`
    Record(StreamSlice, JsonObject),
    /// Every record of the slice has been delivered
    SliceClosed(StreamSlice),
    /// End of stream
    Done,
}

impl QueueItem {
    fn priority(&self) -> u8 {
        match self {
            QueueItem::Error(_) => 0,
            _ => 1,
        }
    }

    fn is_error(&self) -> bool {
        matches!(self, QueueItem::Error(_))
    }
}

struct Entry {
    priority: u8,
    seq: u64,
    item: QueueItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.priority, self.seq) == (other.priority, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; the lowest (priority, seq) must come out first
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    /// Non-error items currently queued
    buffered: usize,
}

/// Bounded priority queue shared by the read threads and the iterator.
///
/// Data pushes block while `capacity` items are buffered; errors are never
/// blocked.
pub struct ResultQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ResultQueue {
    /// Create a queue buffering at most `capacity` data items
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                buffered: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push an item, waiting in `poll` steps while the queue is full.
    ///
    /// Returns `false` if `cancel` was raised before there was room.
    pub fn push(&self, item: QueueItem, cancel: &AtomicBool, poll: Duration) -> bool {
        let mut state = self.state.lock();
        if !item.is_error() {
            while state.buffered >= self.capacity {
                if cancel.load(AtomicOrdering::Acquire) {
                    return false;
                }
                self.not_full.wait_for(&mut state, poll);
            }
            state.buffered += 1;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            priority: item.priority(),
            seq,
            item,
        });
        self.not_empty.notify_one();
        true
    }

    /// Pop the next item, waiting up to `timeout` for one to arrive
    pub fn pop(&self, timeout: Duration) -> Option<QueueItem> {
        let mut state = self.state.lock();
        if state.heap.is_empty() {
            self.not_empty.wait_for(&mut state, timeout);
        }
        let entry = state.heap.pop()?;
        if !entry.item.is_error() {
            state.buffered = state.buffered.saturating_sub(1);
            self.not_full.notify_one();
        }
        Some(entry.item)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
