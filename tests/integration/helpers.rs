//! Helper functions for integration tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cluster_monitoring::ClusterEvent;
use cluster_monitoring::config::EventConfig;
use cluster_monitoring::events::{EventSink, EventSource, EventSubscription};
use tokio::sync::{Semaphore, mpsc};

/// Event config sized for tests: tiny queue, fast reconnects
pub fn test_event_config(queue_capacity: usize) -> EventConfig {
    EventConfig {
        queue_capacity,
        max_tasks_in_memory: 1_000,
        max_workers_in_memory: 1_000,
        reconnect_floor_secs: 0,
        reconnect_cap_secs: 1,
    }
}

/// A task event payload as it would arrive from the feed
pub fn task_payload(event_type: &str, uuid: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": event_type,
        "uuid": uuid,
        "timestamp": 1717171717.0,
        "hostname": "worker-a@host1",
        "name": "tasks.render",
        "args": "(1, 2)",
        "kwargs": "{}"
    }))
    .unwrap()
}

/// Feed source backed by in-memory channels.
///
/// Each call to `subscribe` consumes the next prepared channel; when
/// they run out, further connection attempts fail (simulating a broker
/// that went away).
pub struct ChannelEventSource {
    subscriptions: Mutex<VecDeque<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl ChannelEventSource {
    pub fn new(feeds: usize) -> (Self, Vec<mpsc::UnboundedSender<Vec<u8>>>) {
        let mut senders = Vec::new();
        let mut receivers = VecDeque::new();

        for _ in 0..feeds {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push_back(rx);
        }

        (
            Self {
                subscriptions: Mutex::new(receivers),
            },
            senders,
        )
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn subscribe(&self) -> anyhow::Result<Box<dyn EventSubscription>> {
        match self.subscriptions.lock().unwrap().pop_front() {
            Some(rx) => Ok(Box::new(ChannelSubscription { rx })),
            None => anyhow::bail!("feed is gone"),
        }
    }
}

struct ChannelSubscription {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl EventSubscription for ChannelSubscription {
    async fn next_raw(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

/// Sink recording delivered task ids, optionally gated on a semaphore
/// so tests can hold the processor mid-delivery.
pub struct CollectingSink {
    pub seen: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub fn seen_ids(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

/// Boxable delegate, since the pipeline takes ownership of its sink
pub struct SinkHandle(pub Arc<CollectingSink>);

#[async_trait]
impl EventSink for SinkHandle {
    async fn process(&self, event: &ClusterEvent) -> anyhow::Result<()> {
        self.0
            .seen
            .lock()
            .unwrap()
            .push(event.task_id.clone().unwrap_or_default());

        if let Some(gate) = &self.0.gate {
            gate.acquire().await?.forget();
        }
        Ok(())
    }
}

/// Route actor logs to the test output when debugging
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `condition` until it holds or a 5s deadline passes.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
