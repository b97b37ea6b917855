//! End-to-end tests for the receiver -> bounded queue -> processor path

use std::sync::Arc;
use std::time::Duration;

use cluster_monitoring::events::{ConnectionState, EventPipeline, TaskLifecycle};
use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;

use super::helpers::*;

#[tokio::test]
async fn events_flow_from_feed_to_sink() {
    init_tracing();

    let (source, mut feeds) = ChannelEventSource::new(1);
    let sink = CollectingSink::new();
    let pipeline = EventPipeline::start(
        Box::new(source),
        Box::new(SinkHandle(sink.clone())),
        &test_event_config(64),
    );

    let feed = feeds.remove(0);
    feed.send(task_payload("task-received", "t1")).unwrap();
    feed.send(task_payload("task-started", "t1")).unwrap();
    feed.send(task_payload("task-succeeded", "t1")).unwrap();

    wait_until(|| sink.seen_ids().len() == 3).await;

    assert_eq!(sink.seen_ids(), vec!["t1", "t1", "t1"]);
    assert_eq!(pipeline.processor().processed_events(), 3);
    assert_eq!(pipeline.receiver().dropped_events(), 0);
    assert_eq!(
        pipeline.receiver().connection_state().await,
        ConnectionState::Subscribed
    );

    // The state view tracked the lifecycle alongside delivery
    let snapshot = pipeline.receiver().state_snapshot().await;
    assert_eq!(snapshot.tasks["t1"].lifecycle, TaskLifecycle::Succeeded);
    assert!(snapshot.workers["worker-a@host1"].online);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn overflow_beyond_capacity_drops_exactly_the_excess() {
    let capacity = 8;
    let gate = Arc::new(Semaphore::new(0));
    let (source, mut feeds) = ChannelEventSource::new(1);
    let sink = CollectingSink::gated(gate.clone());
    let pipeline = EventPipeline::start(
        Box::new(source),
        Box::new(SinkHandle(sink.clone())),
        &test_event_config(capacity),
    );

    let feed = feeds.remove(0);

    // First event gets pulled by the processor, which then blocks in
    // the sink, leaving the queue empty.
    feed.send(task_payload("task-received", "t0")).unwrap();
    wait_until(|| sink.seen_ids().len() == 1).await;

    // Fill the queue to capacity, then overflow it
    for i in 0..capacity {
        feed.send(task_payload("task-received", &format!("queued{i}"))).unwrap();
    }
    for i in 0..5 {
        feed.send(task_payload("task-received", &format!("excess{i}"))).unwrap();
    }

    wait_until(|| pipeline.receiver().dropped_events() == 5).await;

    // Release the sink: everything that was queued must be delivered
    // exactly once, nothing more.
    gate.add_permits(1_000);
    wait_until(|| sink.seen_ids().len() == 1 + capacity).await;

    let seen = sink.seen_ids();
    assert_eq!(seen.len(), 1 + capacity);
    assert!(seen.iter().all(|id| !id.starts_with("excess")));

    let mut deduped = seen.clone();
    deduped.dedup();
    assert_eq!(deduped, seen, "no event may be delivered twice");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_prompt_and_idempotent_with_a_full_queue() {
    let gate = Arc::new(Semaphore::new(0));
    let (source, mut feeds) = ChannelEventSource::new(1);
    let sink = CollectingSink::gated(gate.clone());
    let pipeline = EventPipeline::start(
        Box::new(source),
        Box::new(SinkHandle(sink.clone())),
        &test_event_config(2),
    );

    let feed = feeds.remove(0);
    for i in 0..10 {
        feed.send(task_payload("task-received", &format!("t{i}"))).unwrap();
    }
    wait_until(|| pipeline.receiver().dropped_events() > 0).await;

    tokio::time::timeout(Duration::from_secs(1), pipeline.shutdown())
        .await
        .expect("shutdown must not block on a full queue");

    // Second shutdown is a no-op
    tokio::time::timeout(Duration::from_secs(1), pipeline.shutdown())
        .await
        .expect("repeated shutdown must be safe");
}

#[tokio::test]
async fn receiver_reconnects_after_feed_loss() {
    let (source, mut feeds) = ChannelEventSource::new(2);
    let sink = CollectingSink::new();
    let pipeline = EventPipeline::start(
        Box::new(source),
        Box::new(SinkHandle(sink.clone())),
        &test_event_config(64),
    );

    let first = feeds.remove(0);
    let second = feeds.remove(0);

    first.send(task_payload("task-received", "before")).unwrap();
    wait_until(|| sink.seen_ids().len() == 1).await;

    // Kill the first feed; the receiver must come back on the second
    drop(first);

    second.send(task_payload("task-received", "after")).unwrap();
    wait_until(|| sink.seen_ids().len() == 2).await;

    assert_eq!(sink.seen_ids(), vec!["before", "after"]);

    pipeline.shutdown().await;
}
