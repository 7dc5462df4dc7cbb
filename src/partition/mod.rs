//! Partition routing module
//!
//! Supports: single partition, static list, parent stream
//!
//! # Overview
//!
//! Partitions split a stream into independently tracked subsets:
//! - Child resources that require a parent ID
//! - Static list of values (e.g., regions, accounts)
//!
//! Routers yield partition keys lazily; the aggregate cursors in
//! `incremental` pair each key with cursor slices.

mod routers;
mod types;

pub use routers::{ListRouter, ParentRouter, SinglePartitionRouter, PARENT_SLICE_KEY};
pub use types::{PartitionConfig, PartitionIter, PartitionRouter};
