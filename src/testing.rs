//! Shared fixtures for unit tests

use crate::cursor::{
    Cursor, CursorFactory, DatetimeCursor, DatetimeCursorConfig, ResumableFullRefreshCursor,
};
use crate::error::Result;
use crate::incremental::SingleStreamCursor;
use crate::stream::{DefaultStream, ReadRequest, RecordIter, Retriever};
use crate::types::{JsonObject, JsonValue};
use std::sync::Arc;

/// Unwrap a JSON object literal
pub fn obj(value: JsonValue) -> JsonObject {
    value.as_object().cloned().unwrap_or_default()
}

/// Retriever answering every request from a plain function
pub fn retriever<F>(records: F) -> Arc<dyn Retriever>
where
    F: Fn(&ReadRequest) -> Vec<JsonValue> + Send + Sync + 'static,
{
    Arc::new(move |request: &ReadRequest| -> Result<RecordIter> {
        let rows: Vec<Result<JsonObject>> = records(request).into_iter().map(|v| Ok(obj(v))).collect();
        Ok(Box::new(rows.into_iter()))
    })
}

/// Daily cursor over January 1st to 3rd 2024 on `updated_at`
pub fn daily_config() -> DatetimeCursorConfig {
    DatetimeCursorConfig::new("updated_at", "2024-01-01T00:00:00Z")
        .with_end("2024-01-03T23:59:59Z")
        .with_step("1d", "1s")
}

/// One-slice cursor over January 2024 on `updated_at`
pub fn january_config() -> DatetimeCursorConfig {
    DatetimeCursorConfig::new("updated_at", "2024-01-01T00:00:00Z").with_end("2024-01-31T00:00:00Z")
}

/// Factory building datetime cursors from `config`
pub fn datetime_factory(config: DatetimeCursorConfig) -> Arc<dyn CursorFactory> {
    Arc::new(move || -> Box<dyn Cursor> {
        match DatetimeCursor::new(&config) {
            Ok(cursor) => Box::new(cursor),
            Err(_) => Box::new(ResumableFullRefreshCursor::new()),
        }
    })
}

/// Factory building resumable full refresh cursors
pub fn full_refresh_factory() -> Arc<dyn CursorFactory> {
    Arc::new(|| -> Box<dyn Cursor> { Box::new(ResumableFullRefreshCursor::new()) })
}

/// Unpartitioned full refresh stream emitting `{"id": <id>}` for each id
pub fn id_stream(name: &str, ids: &[&str]) -> DefaultStream {
    let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    DefaultStream::new(
        name,
        Arc::new(SingleStreamCursor::new(
            name,
            Box::new(ResumableFullRefreshCursor::new()),
        )),
        retriever(move |_| ids.iter().map(|id| serde_json::json!({ "id": id })).collect()),
    )
}
