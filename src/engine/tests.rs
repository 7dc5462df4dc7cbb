//! Tests for engine module

use super::*;
use crate::cursor::{DatetimeCursor, PartitionKey, StreamSlice};
use crate::error::Error;
use crate::incremental::{PerPartitionCursor, SingleStreamCursor};
use crate::partition::{ListRouter, PartitionIter, PartitionRouter};
use crate::stream::{Availability, DefaultStream, ReadRequest, RecordIter};
use crate::testing::{daily_config, datetime_factory, obj, retriever};
use crate::types::JsonValue;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use test_case::test_case;

// ============================================================================
// Fixtures
// ============================================================================

fn test_config(concurrency: usize) -> ReadConfig {
    ReadConfig::new()
        .with_concurrency(concurrency)
        .with_poll_timeout_ms(10)
        .with_checkpoint_interval(0)
}

/// `count` records per slice, one hour apart from the slice start
fn hourly_records(request: &ReadRequest, count: usize) -> Vec<JsonValue> {
    let day = request
        .slice
        .get("start_time")
        .and_then(JsonValue::as_str)
        .map(|s| s[..11].to_string())
        .unwrap_or_default();
    let partition = request.slice.partition.get_string("id").unwrap_or("-").to_string();
    (0..count)
        .map(|hour| {
            json!({
                "id": format!("{partition}/{day}{hour:02}"),
                "updated_at": format!("{day}{hour:02}:00:00Z"),
            })
        })
        .collect()
}

/// Unpartitioned stream over three daily slices
fn daily_stream(per_slice: usize) -> Arc<dyn Stream> {
    let cursor = DatetimeCursor::new(&daily_config()).unwrap();
    Arc::new(
        DefaultStream::new(
            "events",
            Arc::new(SingleStreamCursor::new("events", Box::new(cursor))),
            retriever(move |request| hourly_records(request, per_slice)),
        )
        .with_cursor_field("updated_at"),
    )
}

/// Per-partition stream; partition `a` is read slowest so workers finish out of order
fn partitioned_stream(partitions: &[&str], per_slice: usize) -> Arc<dyn Stream> {
    let router = Arc::new(ListRouter::new(
        partitions.iter().map(|p| p.to_string()).collect(),
        "id",
    ));
    let cursor = PerPartitionCursor::new("tickets", router, datetime_factory(daily_config()));
    Arc::new(DefaultStream::new(
        "tickets",
        Arc::new(cursor),
        retriever(move |request| {
            if request.slice.partition.get_string("id") == Some("a") {
                thread::sleep(Duration::from_millis(15));
            }
            hourly_records(request, per_slice)
        }),
    ))
}

fn stream_with_retriever<F>(name: &str, read: F) -> Arc<dyn Stream>
where
    F: Fn(&ReadRequest) -> crate::Result<RecordIter> + Send + Sync + 'static,
{
    let cursor = DatetimeCursor::new(&daily_config()).unwrap();
    Arc::new(DefaultStream::new(
        name,
        Arc::new(SingleStreamCursor::new(name, Box::new(cursor))),
        Arc::new(read),
    ))
}

fn read_all(stream: Arc<dyn Stream>, mode: SyncMode, config: &ReadConfig) -> Vec<crate::Result<Message>> {
    StreamFacade::new(stream, config.clone()).read(mode).collect()
}

fn ok_messages(results: Vec<crate::Result<Message>>) -> Vec<Message> {
    results.into_iter().map(|m| m.unwrap()).collect()
}

fn record_ids(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Record(record) => record.get("id").and_then(JsonValue::as_str).map(String::from),
            _ => None,
        })
        .collect()
}

fn states(messages: &[Message]) -> Vec<JsonValue> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::State { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Message / Config Tests
// ============================================================================

#[test]
fn test_message_kinds() {
    let state = Message::state("users", json!({"updated_at": "2024-01-01"}));
    assert!(state.is_state());
    assert!(!state.is_record());
    assert_eq!(state.stream(), "users");

    let status = Message::status("users", StreamStatus::Complete);
    assert!(status.is_status());
    assert_eq!(status.stream(), "users");
}

#[test]
fn test_read_config_defaults() {
    let config = ReadConfig::default();
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.queue_capacity, 16);
    assert_eq!(config.checkpoint_interval, 1000);
    assert_eq!(config.max_retries, 0);
    assert!(config.is_concurrent());
    assert!(!ReadConfig::sequential().is_concurrent());
}

#[test]
fn test_read_config_builder_clamps() {
    let config = ReadConfig::new()
        .with_concurrency(0)
        .with_poll_timeout_ms(25)
        .with_retries(3, 40);
    assert_eq!(config.concurrency, 1);
    assert_eq!(config.poll_timeout(), Duration::from_millis(25));
    assert_eq!(config.retry_backoff(), Duration::from_millis(40));
    assert_eq!(config.max_retries, 3);
}

#[test]
fn test_read_config_yaml() {
    let config: ReadConfig = serde_yaml::from_str("concurrency: 2\ncheckpoint_interval: 10\n").unwrap();
    assert_eq!(config.concurrency, 2);
    assert_eq!(config.checkpoint_interval, 10);
    assert_eq!(config.result_capacity, ReadConfig::default().result_capacity);
}

#[test]
fn test_sync_stats_merge() {
    let mut total = SyncStats::new();
    let mut one = SyncStats::new();
    one.add_record();
    one.add_record();
    one.add_slice();
    one.add_stream();
    total.merge(&one);
    total.merge(&one);
    assert_eq!(total.records_synced, 4);
    assert_eq!(total.slices_closed, 2);
    assert_eq!(total.streams_synced, 2);
}

// ============================================================================
// Queue / Tracker / Retry Tests
// ============================================================================

#[test]
fn test_result_queue_errors_first_then_push_order() {
    let queue = ResultQueue::new(8);
    let cancel = AtomicBool::new(false);
    let poll = Duration::from_millis(5);
    let slice = StreamSlice::default();

    assert!(queue.push(QueueItem::Record(slice.clone(), obj(json!({"n": 1}))), &cancel, poll));
    assert!(queue.push(QueueItem::SliceClosed(slice.clone()), &cancel, poll));
    assert!(queue.push(QueueItem::Error(Error::Other("boom".into())), &cancel, poll));
    assert_eq!(queue.len(), 3);

    assert!(matches!(queue.pop(poll), Some(QueueItem::Error(_))));
    assert!(matches!(queue.pop(poll), Some(QueueItem::Record(_, _))));
    assert!(matches!(queue.pop(poll), Some(QueueItem::SliceClosed(_))));
    assert!(queue.pop(poll).is_none());
    assert!(queue.is_empty());
}

#[test]
fn test_result_queue_full_push_gives_up_on_cancel() {
    let queue = ResultQueue::new(1);
    let cancel = AtomicBool::new(false);
    let poll = Duration::from_millis(5);

    assert!(queue.push(QueueItem::Done, &cancel, poll));
    cancel.store(true, Ordering::Release);
    assert!(!queue.push(QueueItem::Done, &cancel, poll));
    // Errors bypass the bound
    assert!(queue.push(QueueItem::Error(Error::cancelled("s")), &cancel, poll));
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_result_queue_unblocks_producer() {
    let queue = Arc::new(ResultQueue::new(1));
    let cancel = Arc::new(AtomicBool::new(false));
    let poll = Duration::from_millis(5);
    assert!(queue.push(QueueItem::Done, &cancel, poll));

    let pusher = {
        let queue = Arc::clone(&queue);
        let cancel = Arc::clone(&cancel);
        thread::spawn(move || queue.push(QueueItem::Done, &cancel, poll))
    };
    thread::sleep(Duration::from_millis(20));
    assert!(matches!(queue.pop(poll), Some(QueueItem::Done)));
    assert!(pusher.join().unwrap());
    assert_eq!(queue.len(), 1);
}

#[test_case(3, &[false, false, true, false, false, true] ; "every third")]
#[test_case(1, &[true, true, true] ; "every record")]
#[test_case(0, &[false, false, false] ; "disabled")]
fn test_checkpoint_tracker(interval: usize, expected: &[bool]) {
    let mut tracker = CheckpointTracker::new(interval);
    let due: Vec<bool> = expected.iter().map(|_| tracker.record_observed()).collect();
    assert_eq!(due, expected);
}

#[test]
fn test_checkpoint_tracker_reset() {
    let mut tracker = CheckpointTracker::new(5);
    tracker.record_observed();
    tracker.record_observed();
    assert_eq!(tracker.pending(), 2);
    tracker.reset();
    assert_eq!(tracker.pending(), 0);
}

#[test_case(Error::transient("s", "{}", "timeout"), 0, 0, true ; "transient first attempt")]
#[test_case(Error::transient("s", "{}", "timeout"), 0, 2, false ; "retries exhausted")]
#[test_case(Error::transient("s", "{}", "timeout"), 1, 0, false ; "records already forwarded")]
#[test_case(Error::retrieval("s", "{}", "bad request"), 0, 0, false ; "fatal error")]
fn test_retry_policy(err: Error, forwarded: usize, attempt: u32, expected: bool) {
    let policy = RetryPolicy::from_config(&ReadConfig::new().with_retries(2, 1));
    assert_eq!(policy.allows(&err, forwarded, attempt), expected);
}

#[test]
fn test_retry_pause_stops_on_cancel() {
    let policy = RetryPolicy::from_config(&ReadConfig::new().with_retries(1, 10_000).with_poll_timeout_ms(5));
    let cancel = AtomicBool::new(true);
    assert!(!policy.pause(&cancel));
}

// ============================================================================
// Read Contract Tests
// ============================================================================

#[test_case(1 ; "sequential")]
#[test_case(4 ; "four workers")]
fn test_read_message_sequence(concurrency: usize) {
    let messages = ok_messages(read_all(daily_stream(1), SyncMode::Incremental, &test_config(concurrency)));

    assert_eq!(messages.first(), Some(&Message::status("events", StreamStatus::Started)));
    assert_eq!(messages.last(), Some(&Message::status("events", StreamStatus::Complete)));
    assert_eq!(
        record_ids(&messages),
        vec!["-/2024-01-01T00", "-/2024-01-02T00", "-/2024-01-03T00"]
    );
    assert_eq!(
        states(&messages),
        vec![json!({"updated_at": "2024-01-03T00:00:00Z"})]
    );
}

#[test_case(2 ; "two workers")]
#[test_case(4 ; "four workers")]
#[test_case(8 ; "eight workers")]
fn test_concurrent_order_matches_sequential(concurrency: usize) {
    let partitions = ["a", "b", "c", "d"];
    let sequential = ok_messages(read_all(
        partitioned_stream(&partitions, 3),
        SyncMode::Incremental,
        &test_config(1),
    ));
    let concurrent = ok_messages(read_all(
        partitioned_stream(&partitions, 3),
        SyncMode::Incremental,
        &test_config(concurrency).with_queue_capacity(2).with_result_capacity(4),
    ));

    assert_eq!(record_ids(&sequential).len(), 4 * 3 * 3);
    assert_eq!(record_ids(&concurrent), record_ids(&sequential));
    assert_eq!(states(&concurrent), states(&sequential));
}

#[test_case(1 ; "sequential")]
#[test_case(3 ; "concurrent")]
fn test_checkpoint_after_k_records(concurrency: usize) {
    let config = test_config(concurrency).with_checkpoint_interval(4);
    let mut read = StreamFacade::new(daily_stream(2), config).read(SyncMode::Incremental);
    let messages: Vec<Message> = read.by_ref().map(|m| m.unwrap()).collect();

    // Started, 4 records, then the checkpoint carrying the 4th record's value
    assert!(messages[1..5].iter().all(Message::is_record));
    assert_eq!(
        messages[5],
        Message::state("events", json!({"updated_at": "2024-01-02T01:00:00Z"}))
    );
    assert_eq!(
        states(&messages),
        vec![
            json!({"updated_at": "2024-01-02T01:00:00Z"}),
            json!({"updated_at": "2024-01-03T01:00:00Z"}),
        ]
    );

    let stats = read.stats();
    assert_eq!(stats.records_synced, 6);
    assert_eq!(stats.slices_closed, 3);
    assert_eq!(stats.checkpoints, 2);
    assert_eq!(stats.streams_synced, 1);
}

#[test]
fn test_full_refresh_has_only_final_state() {
    let config = test_config(1).with_checkpoint_interval(1);
    let messages = ok_messages(read_all(daily_stream(2), SyncMode::FullRefresh, &config));
    assert_eq!(record_ids(&messages).len(), 6);
    assert_eq!(states(&messages).len(), 1);
}

#[test_case(1 ; "sequential")]
#[test_case(2 ; "concurrent")]
fn test_incremental_skips_records_behind_cursor(concurrency: usize) {
    let stream = daily_stream(3);
    stream
        .cursor()
        .set_initial_state(&json!({"updated_at": "2024-01-03T01:00:00Z"}))
        .unwrap();

    let mut read = StreamFacade::new(stream, test_config(concurrency)).read(SyncMode::Incremental);
    let messages: Vec<Message> = read.by_ref().map(|m| m.unwrap()).collect();

    assert_eq!(record_ids(&messages), vec!["-/2024-01-03T01", "-/2024-01-03T02"]);
    assert_eq!(read.stats().records_skipped, 1);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test_case(1 ; "sequential")]
#[test_case(3 ; "concurrent")]
fn test_retrieval_error_ends_read(concurrency: usize) {
    let stream = stream_with_retriever("events", |request: &ReadRequest| -> crate::Result<RecordIter> {
        if request.slice.get("start_time") == Some(&json!("2024-01-02T00:00:00Z")) {
            return Err(Error::retrieval("events", "", "403 Forbidden"));
        }
        Ok(Box::new(std::iter::once(Ok(obj(json!({"updated_at": "2024-01-01T05:00:00Z"}))))))
    });

    let results = read_all(stream, SyncMode::Incremental, &test_config(concurrency));
    let last = results.last().unwrap();
    assert!(matches!(last, Err(Error::Retrieval { .. })));
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert!(!results
        .iter()
        .any(|r| matches!(r, Ok(Message::Status { status: StreamStatus::Complete, .. }))));
}

#[test_case(1 ; "sequential")]
#[test_case(2 ; "concurrent")]
fn test_transient_error_is_retried(concurrency: usize) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let stream = stream_with_retriever("events", move |request: &ReadRequest| -> crate::Result<RecordIter> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Error::transient("events", "", "503"));
        }
        let rows: Vec<crate::Result<_>> = hourly_records(request, 1).into_iter().map(|v| Ok(obj(v))).collect();
        Ok(Box::new(rows.into_iter()))
    });

    let config = test_config(concurrency).with_retries(2, 1);
    let messages = ok_messages(read_all(stream, SyncMode::FullRefresh, &config));

    assert_eq!(record_ids(&messages).len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_error_after_forwarded_records_is_not_retried() {
    let stream = stream_with_retriever("events", |_: &ReadRequest| -> crate::Result<RecordIter> {
        let rows: Vec<crate::Result<_>> = vec![
            Ok(obj(json!({"updated_at": "2024-01-01T01:00:00Z"}))),
            Err(Error::transient("events", "", "connection reset")),
        ];
        Ok(Box::new(rows.into_iter()))
    });

    let config = test_config(1).with_retries(5, 1);
    let results = read_all(stream, SyncMode::FullRefresh, &config);
    assert!(matches!(results.last(), Some(Err(e)) if e.is_retryable()));
}

struct FailingRouter;

impl PartitionRouter for FailingRouter {
    fn partitions(&self) -> crate::Result<PartitionIter> {
        let keys: Vec<crate::Result<PartitionKey>> = vec![
            Ok(PartitionKey::new().with_value("id", "a")),
            Err(Error::Other("parent stream unavailable".into())),
        ];
        Ok(Box::new(keys.into_iter()))
    }
}

#[test_case(1 ; "sequential")]
#[test_case(2 ; "concurrent")]
fn test_partition_enumeration_failure_surfaces(concurrency: usize) {
    let cursor = PerPartitionCursor::new("tickets", Arc::new(FailingRouter), datetime_factory(daily_config()));
    let stream: Arc<dyn Stream> = Arc::new(DefaultStream::new(
        "tickets",
        Arc::new(cursor),
        retriever(|request| hourly_records(request, 1)),
    ));

    let results = read_all(stream, SyncMode::Incremental, &test_config(concurrency));
    match results.last() {
        Some(Err(Error::PartitionEnumeration { stream, message })) => {
            assert_eq!(stream, "tickets");
            assert!(message.contains("parent stream unavailable"));
        }
        other => panic!("Expected PartitionEnumeration error, got {other:?}"),
    }
}

#[test]
fn test_worker_panic_is_reported() {
    let stream = stream_with_retriever("events", |_: &ReadRequest| -> crate::Result<RecordIter> {
        panic!("retriever bug");
    });
    let results = read_all(stream, SyncMode::FullRefresh, &test_config(2));
    assert!(matches!(results.last(), Some(Err(Error::WorkerPanic { .. }))));
}

#[test_case(1 ; "sequential")]
#[test_case(2 ; "concurrent")]
fn test_cancelled_read(concurrency: usize) {
    let cancel = Arc::new(AtomicBool::new(true));
    let stream = daily_stream(2);
    let config = test_config(concurrency);

    let read = if config.is_concurrent() {
        StreamRead::Concurrent(ConcurrentRead::new(stream, SyncMode::FullRefresh, config).with_cancellation(cancel))
    } else {
        StreamRead::Sequential(SequentialRead::new(stream, SyncMode::FullRefresh, &config).with_cancellation(cancel))
    };
    let results: Vec<_> = read.collect();

    assert!(matches!(results.last(), Some(Err(Error::Cancelled { .. }))));
    assert!(!results.iter().any(|r| matches!(r, Ok(m) if m.is_record())));
}

#[test]
fn test_dropping_concurrent_read_stops_threads() {
    let mut read = ConcurrentRead::new(partitioned_stream(&["a", "b", "c"], 5), SyncMode::FullRefresh, test_config(2));
    let cancel = read.cancellation();
    assert!(read.next().is_some());
    drop(read);
    assert!(cancel.load(Ordering::Acquire));
}

#[test]
fn test_completed_read_leaves_shared_flag_alone() {
    let cancel = Arc::new(AtomicBool::new(false));
    let read = ConcurrentRead::new(daily_stream(1), SyncMode::FullRefresh, test_config(2))
        .with_cancellation(Arc::clone(&cancel));
    let results: Vec<_> = read.collect();
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(!cancel.load(Ordering::Acquire));
}

// ============================================================================
// Sync Engine Tests
// ============================================================================

#[test]
fn test_sync_engine_folds_state() {
    let state = StateManager::new();
    let mut engine = SyncEngine::new(state.clone()).with_config(test_config(2));

    let messages = engine.sync_collect(&[daily_stream(2)], SyncMode::Incremental).unwrap();

    assert_eq!(record_ids(&messages).len(), 6);
    assert_eq!(
        state.get_stream_state("events"),
        Some(json!({"updated_at": "2024-01-03T01:00:00Z"}))
    );
    assert_eq!(engine.stats().streams_synced, 1);
    assert_eq!(engine.stats().records_synced, 6);
}

#[test]
fn test_sync_engine_resumes_from_state() {
    let state = StateManager::new();
    SyncEngine::new(state.clone())
        .with_config(test_config(1))
        .sync_collect(&[daily_stream(2)], SyncMode::Incremental)
        .unwrap();

    let mut engine = SyncEngine::new(state.clone()).with_config(test_config(1));
    let messages = engine.sync_collect(&[daily_stream(2)], SyncMode::Incremental).unwrap();

    assert_eq!(record_ids(&messages), vec!["-/2024-01-03T01"]);
    assert_eq!(engine.stats().records_skipped, 1);
}

#[test]
fn test_sync_engine_skips_unavailable_stream() {
    let unavailable: Arc<dyn Stream> = Arc::new(
        DefaultStream::new(
            "secrets",
            Arc::new(SingleStreamCursor::new(
                "secrets",
                Box::new(DatetimeCursor::new(&daily_config()).unwrap()),
            )),
            retriever(|request| hourly_records(request, 1)),
        )
        .with_availability_check(|| Availability::Unavailable("403 Forbidden".into())),
    );

    let mut engine = SyncEngine::new(StateManager::new()).with_config(test_config(1));
    let messages = engine
        .sync_collect(&[unavailable, daily_stream(1)], SyncMode::FullRefresh)
        .unwrap();

    assert!(messages.iter().all(|m| m.stream() == "events"));
    assert_eq!(engine.stats().streams_skipped, 1);
    assert_eq!(engine.stats().streams_synced, 1);
}

#[test]
fn test_sync_engine_rejects_legacy_partitioned_state() {
    let state = StateManager::new();
    state.set_stream_state("tickets", json!({"updated_at": "2024-01-01T00:00:00Z"}));

    let mut engine = SyncEngine::new(state).with_config(test_config(1));
    let err = engine
        .sync_collect(&[partitioned_stream(&["a"], 1)], SyncMode::Incremental)
        .unwrap_err();

    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(engine.stats().errors, 1);
}

#[test]
fn test_sync_engine_emit_error_stops_sync() {
    let mut engine = SyncEngine::new(StateManager::new()).with_config(test_config(1));
    let mut seen = 0;
    let result = engine.sync(&[daily_stream(1)], SyncMode::FullRefresh, |message| {
        seen += 1;
        if message.is_record() {
            return Err(Error::Other("sink closed".into()));
        }
        Ok(())
    });

    assert!(result.is_err());
    assert_eq!(seen, 2);
}

#[test]
fn test_stream_read_reports_mode() {
    let facade = StreamFacade::new(daily_stream(1), test_config(3));
    assert!(facade.read(SyncMode::FullRefresh).is_concurrent());

    let facade = StreamFacade::new(daily_stream(1), test_config(1));
    assert!(!facade.read(SyncMode::FullRefresh).is_concurrent());
}

#[test]
fn test_per_partition_state_from_engine() {
    let messages = ok_messages(read_all(
        partitioned_stream(&["a", "b"], 1),
        SyncMode::Incremental,
        &test_config(2),
    ));
    let final_state = states(&messages).pop().unwrap();
    assert_eq!(
        final_state,
        json!({
            "states": [
                {"partition": {"id": "a"}, "cursor": {"updated_at": "2024-01-03T00:00:00Z"}},
                {"partition": {"id": "b"}, "cursor": {"updated_at": "2024-01-03T00:00:00Z"}}
            ],
            "state": {"updated_at": "2024-01-03T00:00:00Z"}
        })
    );
}
