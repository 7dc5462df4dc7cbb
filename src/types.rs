//! Common types used throughout slicesync
//!
//! This module contains shared type definitions and type aliases
//! used across multiple modules.

use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

// ============================================================================
// Sync Mode
// ============================================================================

/// Synchronization mode for streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full refresh - fetch all data every time
    #[default]
    FullRefresh,
    /// Incremental - only fetch new/updated data
    Incremental,
}

impl SyncMode {
    /// Whether intermediate checkpoints are emitted in this mode
    pub fn is_incremental(self) -> bool {
        matches!(self, SyncMode::Incremental)
    }
}

/// Render a JSON object compactly for log lines and error context
pub fn compact(object: &JsonObject) -> String {
    serde_json::to_string(object).unwrap_or_else(|_| "<unprintable>".to_string())
}
