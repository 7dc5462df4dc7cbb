//! Default stream implementation

use super::types::{Availability, ReadRequest, RecordIter, Retriever, Stream};
use crate::cursor::StreamSlice;
use crate::error::Result;
use crate::incremental::StreamCursor;
use crate::types::{JsonValue, SyncMode};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type AvailabilityCheck = Arc<dyn Fn() -> Availability + Send + Sync>;

/// A stream assembled from a cursor and a retriever
#[derive(Clone)]
pub struct DefaultStream {
    name: String,
    json_schema: JsonValue,
    cursor_field: Option<String>,
    cursor: Arc<dyn StreamCursor>,
    retriever: Arc<dyn Retriever>,
    availability: Option<AvailabilityCheck>,
}

impl DefaultStream {
    /// Create a new stream
    pub fn new(
        name: impl Into<String>,
        cursor: Arc<dyn StreamCursor>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            name: name.into(),
            json_schema: serde_json::json!({"type": "object"}),
            cursor_field: None,
            cursor,
            retriever,
            availability: None,
        }
    }

    /// Set the JSON schema
    #[must_use]
    pub fn with_schema(mut self, schema: JsonValue) -> Self {
        self.json_schema = schema;
        self
    }

    /// Set the cursor field
    #[must_use]
    pub fn with_cursor_field(mut self, field: impl Into<String>) -> Self {
        self.cursor_field = Some(field.into());
        self
    }

    /// Set the availability check
    #[must_use]
    pub fn with_availability_check<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Availability + Send + Sync + 'static,
    {
        self.availability = Some(Arc::new(check));
        self
    }
}

impl fmt::Debug for DefaultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultStream")
            .field("name", &self.name)
            .field("cursor_field", &self.cursor_field)
            .finish_non_exhaustive()
    }
}

impl Stream for DefaultStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_availability(&self) -> Availability {
        self.availability
            .as_ref()
            .map_or(Availability::Available, |check| check())
    }

    fn json_schema(&self) -> JsonValue {
        self.json_schema.clone()
    }

    fn cursor_field(&self) -> Option<&str> {
        self.cursor_field.as_deref()
    }

    fn cursor(&self) -> Arc<dyn StreamCursor> {
        Arc::clone(&self.cursor)
    }

    fn read_slice(&self, slice: &StreamSlice, sync_mode: SyncMode) -> Result<RecordIter> {
        let request = ReadRequest {
            stream: self.name.clone(),
            slice: slice.clone(),
            sync_mode,
            cursor_field: self.cursor_field.clone(),
            stream_state: self.cursor.select_state(slice),
        };
        debug!("Reading {} slice {}", self.name, slice.describe());
        self.retriever
            .read_records(&request)
            .map_err(|e| e.in_slice(&self.name, &slice.describe()))
    }
}
