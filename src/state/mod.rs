//! State management module
//!
//! State shapes exchanged with the state store, and an in-memory manager
//! holding them between syncs.
//!
//! # Overview
//!
//! The state module provides:
//! - `State` - per-stream state objects keyed by stream name
//! - `PerPartitionState` / `GlobalState` - the two partitioned state shapes
//! - `StateManager` - in-memory, thread-safe state hand-off

mod manager;
mod types;

pub use manager::StateManager;
pub use types::{is_empty_state, GlobalState, PartitionStateEntry, PerPartitionState, State};
