//! Stream module
//!
//! The data-retrieval boundary (`Retriever`), the `Stream` surface, and its
//! default implementation.
//!
//! # Overview
//!
//! - `Retriever` - reads the records of one slice
//! - `Stream` - availability, schema, slices, cursor, records
//! - `DefaultStream` - a stream built from a `StreamCursor` and a `Retriever`
//! - `StreamFacade` - picks sequential or concurrent reads from `ReadConfig`

mod default;
mod facade;
mod types;

pub use crate::incremental::SliceIter;
pub use default::DefaultStream;
pub use facade::StreamFacade;
pub use types::{Availability, ReadRequest, RecordIter, Retriever, Stream};
