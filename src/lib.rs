// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]

//! # slicesync
//!
//! Partitioned cursor state and concurrent slice reading for incremental
//! data connectors.
//!
//! ## Features
//!
//! - **Per-partition state**: one cursor per partition behind a bounded,
//!   serializable `{states: [...]}` table
//! - **Global substream state**: one shared cursor with a lookback window
//!   for partitions still in flight
//! - **Concurrent reads**: a worker pool whose output is re-linearized into
//!   slice order, identical to a single-threaded read
//! - **Checkpointing**: intermediate state every N records, final state at
//!   the end of every stream
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use slicesync::{load_config_from_str, Message, StateManager, SyncEngine, SyncMode};
//!
//! let config = load_config_from_str(include_str!("source.yaml"))?;
//! let streams = config.build_streams(|definition| my_retriever(definition))?;
//!
//! let state = StateManager::from_json(&previous_state)?;
//! let mut engine = SyncEngine::new(state.clone()).with_config(config.read.clone());
//! engine.sync(&streams, SyncMode::Incremental, |message| {
//!     if let Message::Record(record) = message {
//!         println!("{}", serde_json::Value::Object(record.data));
//!     }
//!     Ok(())
//! })?;
//!
//! let next_state = state.to_json()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                             │
//! │   StateManager ──seed──▶ StreamCursor ──State──▶ StateManager   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────────┬───────────────┴──────┬───────────────────────────┐
//! │  Partition   │     Incremental      │          Engine           │
//! ├──────────────┼──────────────────────┼───────────────────────────┤
//! │ Single       │ SingleStreamCursor   │ SequentialRead            │
//! │ List         │ PerPartitionCursor   │ ConcurrentRead            │
//! │ Parent       │ GlobalSubstreamCursor│ ResultQueue / Checkpoint  │
//! └──────────────┴──────────────────────┴───────────────────────────┘
//!                                │
//!                Cursor: Datetime │ ResumableFullRefresh
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Source and stream definitions
pub mod config;

/// Leaf cursors and the slice/record data model
pub mod cursor;

/// Partition routing
pub mod partition;

/// Stream-level cursors over partitions
pub mod incremental;

/// State shapes and the in-memory state store
pub mod state;

/// Streams and the data-retrieval boundary
pub mod stream;

/// Read engine
pub mod engine;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use config::{load_config, load_config_from_str, SourceConfig, StreamDefinition};
pub use cursor::{Cursor, CursorFactory, PartitionKey, Record, StreamSlice};
pub use engine::{Message, ReadConfig, StreamStatus, SyncEngine, SyncStats};
pub use incremental::{GlobalSubstreamCursor, PerPartitionCursor, StreamCursor};
pub use partition::PartitionRouter;
pub use state::StateManager;
pub use stream::{DefaultStream, Retriever, Stream, StreamFacade};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
