//! Integration tests using in-memory retrievers
//!
//! Tests the full end-to-end flow: YAML source → partitioned cursors →
//! concurrent reads → state hand-off

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use slicesync::config::CursorDefinition;
use slicesync::cursor::{DatetimeCursorConfig, ResumableFullRefreshCursor};
use slicesync::partition::ListRouter;
use slicesync::stream::{ReadRequest, RecordIter};
use slicesync::{
    load_config_from_str, DefaultStream, GlobalSubstreamCursor, JsonObject, Message,
    PerPartitionCursor, ReadConfig, Retriever, StateManager, Stream, StreamDefinition,
    StreamFacade, SyncEngine, SyncMode,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use test_case::test_case;

fn rows(values: Vec<Value>) -> RecordIter {
    let rows: Vec<slicesync::Result<JsonObject>> = values
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .map(Ok)
        .collect();
    Box::new(rows.into_iter())
}

fn records(messages: &[Message], stream: &str) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Record(record) if record.stream == stream => record.get("id").cloned(),
            _ => None,
        })
        .collect()
}

fn final_state(messages: &[Message], stream: &str) -> Option<Value> {
    messages.iter().rev().find_map(|m| match m {
        Message::State { stream: s, data } if s == stream => Some(data.clone()),
        _ => None,
    })
}

fn read_config(concurrency: usize) -> ReadConfig {
    ReadConfig::new()
        .with_concurrency(concurrency)
        .with_poll_timeout_ms(10)
        .with_checkpoint_interval(0)
}

// ============================================================================
// Two Partition Scenario
// ============================================================================

fn two_partition_stream() -> Arc<dyn Stream> {
    let cursor = CursorDefinition::Datetime(
        DatetimeCursorConfig::new("updated_at", "2024-01-01")
            .with_end("2024-02-29")
            .with_step("31d", "1d")
            .with_format("%Y-%m-%d"),
    );
    let router = ListRouter::new(vec!["A".into(), "B".into()], "id");
    let cursor = PerPartitionCursor::new("items", Arc::new(router), Arc::new(cursor));

    let retriever = |request: &ReadRequest| -> slicesync::Result<RecordIter> {
        let january = request.slice.get("start_time") == Some(&json!("2024-01-01"));
        let values = match (request.slice.partition.get_string("id"), january) {
            (Some("A"), true) => {
                // Make the first partition slow so later slices finish first
                thread::sleep(Duration::from_millis(20));
                vec![json!({"id": "a", "updated_at": "2024-01-15"})]
            }
            (Some("B"), false) => vec![json!({"id": "b", "updated_at": "2024-02-15"})],
            _ => vec![],
        };
        Ok(rows(values))
    };

    Arc::new(DefaultStream::new("items", Arc::new(cursor), Arc::new(retriever)))
}

#[test_case(1 ; "single thread")]
#[test_case(2 ; "two workers")]
#[test_case(4 ; "four workers")]
#[test_case(8 ; "eight workers")]
fn test_two_partition_scenario(concurrency: usize) {
    let messages: Vec<Message> = StreamFacade::new(two_partition_stream(), read_config(concurrency))
        .read(SyncMode::Incremental)
        .map(|m| m.unwrap())
        .collect();

    assert_eq!(records(&messages, "items"), vec![json!("a"), json!("b")]);
    assert_eq!(
        final_state(&messages, "items"),
        Some(json!({
            "states": [
                {"partition": {"id": "A"}, "cursor": {"updated_at": "2024-01-15"}},
                {"partition": {"id": "B"}, "cursor": {"updated_at": "2024-02-15"}}
            ],
            "state": {"updated_at": "2024-02-15"}
        }))
    );
}

// ============================================================================
// YAML Source With Substreams
// ============================================================================

const SOURCE_YAML: &str = r#"
read:
  concurrency: 3
  poll_timeout_ms: 10
  checkpoint_interval: 0
streams:
  - name: projects
  - name: tasks
    cursor:
      type: datetime
      cursor_field: updated_at
      start: "2024-01-01T00:00:00Z"
      end: "2024-01-02T23:59:59Z"
      step: "1d"
      cursor_granularity: "1s"
    partition:
      type: parent
      parent_stream: projects
      parent_key: id
      partition_field: project_id
      incremental_dependency: true
"#;

fn source_retriever(definition: &StreamDefinition) -> Arc<dyn Retriever> {
    if definition.name == "projects" {
        return Arc::new(|_: &ReadRequest| -> slicesync::Result<RecordIter> {
            Ok(rows(vec![json!({"id": "p1"}), json!({"id": "p2"})]))
        });
    }
    Arc::new(|request: &ReadRequest| -> slicesync::Result<RecordIter> {
        let project = request
            .slice
            .partition
            .get_string("project_id")
            .unwrap_or_default()
            .to_string();
        let day = request
            .slice
            .get("start_time")
            .and_then(Value::as_str)
            .map(|s| s[..10].to_string())
            .unwrap_or_default();
        Ok(rows(vec![json!({
            "id": format!("{project}-{day}"),
            "updated_at": format!("{day}T06:00:00Z"),
        })]))
    })
}

fn sync_source(state: &StateManager) -> Vec<Message> {
    let config = load_config_from_str(SOURCE_YAML).unwrap();
    let streams = config.build_streams(source_retriever).unwrap();
    SyncEngine::new(state.clone())
        .with_config(config.read.clone())
        .sync_collect(&streams, SyncMode::Incremental)
        .unwrap()
}

#[test]
fn test_source_with_parent_stream() {
    let state = StateManager::new();
    let messages = sync_source(&state);

    assert_eq!(records(&messages, "projects"), vec![json!("p1"), json!("p2")]);
    assert_eq!(
        records(&messages, "tasks"),
        vec![
            json!("p1-2024-01-01"),
            json!("p1-2024-01-02"),
            json!("p2-2024-01-01"),
            json!("p2-2024-01-02"),
        ]
    );
    assert_eq!(
        state.get_stream_state("tasks"),
        Some(json!({
            "states": [
                {
                    "partition": {"project_id": "p1", "parent_slice": {}},
                    "cursor": {"updated_at": "2024-01-02T06:00:00Z"}
                },
                {
                    "partition": {"project_id": "p2", "parent_slice": {}},
                    "cursor": {"updated_at": "2024-01-02T06:00:00Z"}
                }
            ],
            "state": {"updated_at": "2024-01-02T06:00:00Z"},
            "parent_state": {"projects": {"__ab_full_refresh_sync_complete": true}}
        }))
    );
    assert_eq!(
        state.get_stream_state("projects"),
        Some(json!({"__ab_full_refresh_sync_complete": true}))
    );
}

#[test]
fn test_source_resumes_from_persisted_state() {
    let first = StateManager::new();
    sync_source(&first);
    let persisted = first.to_json().unwrap();

    let second = StateManager::from_json(&persisted).unwrap();
    let messages = sync_source(&second);

    // Each partition restarts at its own committed value
    assert_eq!(
        records(&messages, "tasks"),
        vec![json!("p1-2024-01-02"), json!("p2-2024-01-02")]
    );
    assert_eq!(second.to_json().unwrap(), persisted);
}

// ============================================================================
// State Properties
// ============================================================================

#[test]
fn test_state_round_trip_without_new_records() {
    let stream = two_partition_stream();
    let first: Vec<Message> = StreamFacade::new(Arc::clone(&stream), read_config(2))
        .read(SyncMode::Incremental)
        .map(|m| m.unwrap())
        .collect();
    let state = final_state(&first, "items").unwrap();

    let quiet: Arc<dyn Stream> = {
        let router = ListRouter::new(vec!["A".into(), "B".into()], "id");
        let factory = CursorDefinition::Datetime(
            DatetimeCursorConfig::new("updated_at", "2024-01-01")
                .with_end("2024-02-29")
                .with_step("31d", "1d")
                .with_format("%Y-%m-%d"),
        );
        let cursor = PerPartitionCursor::new("items", Arc::new(router), Arc::new(factory));
        let retriever = |_: &ReadRequest| -> slicesync::Result<RecordIter> { Ok(rows(vec![])) };
        Arc::new(DefaultStream::new("items", Arc::new(cursor), Arc::new(retriever)))
    };
    quiet.cursor().set_initial_state(&state).unwrap();
    let second: Vec<Message> = StreamFacade::new(quiet, read_config(2))
        .read(SyncMode::Incremental)
        .map(|m| m.unwrap())
        .collect();

    assert_eq!(final_state(&second, "items"), Some(state));
}

#[test]
fn test_partition_bound_keeps_most_recent() {
    let values: Vec<String> = (0..50).map(|i| format!("p{i:02}")).collect();
    let cursor = PerPartitionCursor::new(
        "items",
        Arc::new(ListRouter::new(values, "id")),
        Arc::new(CursorDefinition::ResumableFullRefresh),
    )
    .with_max_partitions(10);
    let retriever = |request: &ReadRequest| -> slicesync::Result<RecordIter> {
        Ok(rows(vec![json!({"id": request.slice.partition.get_string("id")})]))
    };
    let stream: Arc<dyn Stream> =
        Arc::new(DefaultStream::new("items", Arc::new(cursor), Arc::new(retriever)));

    let messages: Vec<Message> = StreamFacade::new(stream, read_config(4))
        .read(SyncMode::FullRefresh)
        .map(|m| m.unwrap())
        .collect();
    assert_eq!(records(&messages, "items").len(), 50);

    let state = final_state(&messages, "items").unwrap();
    let partitions: Vec<&Value> = state["states"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| &entry["partition"]["id"])
        .collect();
    let expected: Vec<Value> = (40..50).map(|i| json!(format!("p{i:02}"))).collect();
    assert_eq!(partitions, expected.iter().collect::<Vec<_>>());
}

#[test_case(1 ; "single thread")]
#[test_case(4 ; "four workers")]
fn test_global_cursor_terminal_marker(concurrency: usize) {
    let router = ListRouter::new((0..6).map(|i| format!("r{i}")).collect(), "region");
    let cursor = GlobalSubstreamCursor::new(
        "regions",
        Arc::new(router),
        Box::new(ResumableFullRefreshCursor::new()),
    );
    let retriever = |request: &ReadRequest| -> slicesync::Result<RecordIter> {
        Ok(rows(vec![json!({"id": request.slice.partition.get_string("region")})]))
    };
    let stream: Arc<dyn Stream> =
        Arc::new(DefaultStream::new("regions", Arc::new(cursor), Arc::new(retriever)));

    let messages: Vec<Message> = StreamFacade::new(stream, read_config(concurrency))
        .read(SyncMode::FullRefresh)
        .map(|m| m.unwrap())
        .collect();

    assert_eq!(records(&messages, "regions").len(), 6);
    assert_eq!(
        final_state(&messages, "regions"),
        Some(json!({"state": {"__ab_full_refresh_sync_complete": true}, "lookback_window": 0}))
    );
}

#[test]
fn test_legacy_state_is_rejected() {
    let state = StateManager::new();
    state.set_stream_state("tasks", json!({"updated_at": "2024-01-01T00:00:00Z"}));

    let config = load_config_from_str(SOURCE_YAML).unwrap();
    let streams = config.build_streams(source_retriever).unwrap();
    let err = SyncEngine::new(state)
        .with_config(config.read.clone())
        .sync_collect(&streams, SyncMode::Incremental)
        .unwrap_err();

    assert!(matches!(err, slicesync::Error::InvalidState { .. }));
}
