//! State manager implementation
//!
//! In-memory hand-off point between the sync engine and an external state
//! store: state is loaded from and exported to JSON, never written to disk.

use super::types::State;
use crate::error::{Error, Result};
use crate::types::JsonValue;
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;

/// Shared, cloneable view of per-stream state
#[derive(Debug, Clone, Default)]
pub struct StateManager {
    /// Current state
    state: Arc<RwLock<State>>,
}

impl StateManager {
    /// Create an empty state manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state manager holding `state`
    pub fn from_state(state: State) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Create a state manager from a JSON document `{"streams": {...}}`
    pub fn from_json(json: &str) -> Result<Self> {
        let state: State = serde_json::from_str(json)
            .map_err(|e| Error::state(format!("Failed to parse state JSON: {e}")))?;
        Ok(Self::from_state(state))
    }

    /// Get a read lock on the current state
    pub fn state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> State {
        self.state.read().clone()
    }

    /// Export state as JSON string
    pub fn to_json(&self) -> Result<String> {
        let state = self.state.read();
        serde_json::to_string(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Export state as pretty-printed JSON string
    pub fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read();
        serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Get state for a stream
    pub fn get_stream_state(&self, stream: &str) -> Option<JsonValue> {
        self.state.read().get_stream(stream).cloned()
    }

    /// Replace state for a stream
    pub fn set_stream_state(&self, stream: &str, state: JsonValue) {
        self.state.write().set_stream(stream, state);
    }

    /// Names of streams with stored state
    pub fn streams(&self) -> Vec<String> {
        self.state.read().streams.keys().cloned().collect()
    }

    /// Clear all state
    pub fn clear(&self) {
        *self.state.write() = State::new();
    }

    /// Clear state for a specific stream
    pub fn clear_stream(&self, stream: &str) {
        self.state.write().streams.remove(stream);
    }
}
