//! EventReceiverActor - long-lived subscriber to the cluster event feed
//!
//! ## Connection State Machine
//!
//! ```text
//! Disconnected → Connecting → Subscribed
//!       ↑            │            │
//!       └────────────┴────────────┘
//!         any transport error, retried forever with
//!         exponential backoff (doubling, capped)
//! ```
//!
//! Only a Shutdown command terminates the loop; transient failure never
//! does. Every inbound event is applied to the shared [`ClusterState`]
//! (last write wins) and then offered to the bounded queue with a
//! non-blocking send. Overflow is dropped and counted - blocking here
//! would stall the feed connection and risk missed heartbeats.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, instrument, trace, warn};

use crate::config::EventConfig;
use crate::{ClusterEvent, EventType};

use super::state::{ClusterState, StateSnapshot};
use super::EventSource;

// A zero floor would spin on a dead broker
const MIN_BACKOFF: Duration = Duration::from_millis(100);

/// Where the receiver currently stands with the event feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

#[derive(Debug)]
enum ReceiverCommand {
    Shutdown,
}

/// Outcome of one wait inside the subscribed loop
enum Step {
    Inbound(Vec<u8>),
    Closed,
    Broken(anyhow::Error),
    Stop,
}

/// Actor owning the feed subscription
pub struct EventReceiverActor {
    source: Box<dyn EventSource>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ReceiverCommand>,

    /// Bounded queue towards the processor
    event_tx: mpsc::Sender<ClusterEvent>,

    /// Shared state view, read by summary/inspection callers
    state_view: Arc<RwLock<ClusterState>>,

    connection_state: Arc<RwLock<ConnectionState>>,

    /// Events lost to a full queue since startup
    dropped_events: Arc<AtomicU64>,

    reconnect_floor: Duration,
    reconnect_cap: Duration,
}

impl EventReceiverActor {
    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command arrives or the command channel
    /// closes. A broken or unreachable feed is retried forever.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting event receiver");

        let mut backoff = self.reconnect_floor;

        'outer: loop {
            self.set_connection_state(ConnectionState::Connecting).await;

            let attempt = tokio::select! {
                result = self.source.subscribe() => Some(result),
                _ = self.command_rx.recv() => None,
            };

            let mut subscription = match attempt {
                None => break 'outer,
                Some(Ok(subscription)) => subscription,
                Some(Err(e)) => {
                    warn!("event feed connect failed: {e:#}, retrying in {backoff:?}");
                    self.set_connection_state(ConnectionState::Disconnected).await;
                    if self.sleep_or_shutdown(backoff).await {
                        break 'outer;
                    }
                    backoff = (backoff * 2).min(self.reconnect_cap);
                    continue;
                }
            };

            debug!("subscribed to event feed");
            self.set_connection_state(ConnectionState::Subscribed).await;
            backoff = self.reconnect_floor;

            loop {
                let step = tokio::select! {
                    _ = self.command_rx.recv() => Step::Stop,
                    payload = subscription.next_raw() => match payload {
                        Ok(Some(bytes)) => Step::Inbound(bytes),
                        Ok(None) => Step::Closed,
                        Err(e) => Step::Broken(e),
                    },
                };

                match step {
                    Step::Inbound(bytes) => self.handle_payload(&bytes).await,
                    Step::Closed => {
                        warn!("event feed closed by peer, reconnecting in {backoff:?}");
                        break;
                    }
                    Step::Broken(e) => {
                        warn!("event feed broke: {e:#}, reconnecting in {backoff:?}");
                        break;
                    }
                    Step::Stop => break 'outer,
                }
            }

            self.set_connection_state(ConnectionState::Disconnected).await;
            if self.sleep_or_shutdown(backoff).await {
                break 'outer;
            }
            backoff = (backoff * 2).min(self.reconnect_cap);
        }

        self.set_connection_state(ConnectionState::Disconnected).await;
        debug!("event receiver stopped");
    }

    /// Wait out the backoff delay. Returns true when a shutdown arrived
    /// during the wait.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.command_rx.recv() => true,
        }
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.write().await = state;
    }

    /// Parse, record, and enqueue one inbound payload.
    ///
    /// Malformed payloads are logged and skipped. The enqueue is
    /// non-blocking: overflow drops the event with a warning.
    async fn handle_payload(&self, payload: &[u8]) {
        let Some(event) = parse_event(payload) else {
            return;
        };

        self.state_view.write().await.apply(&event);

        match self.event_tx.try_send(event) {
            Ok(()) => trace!("event queued"),
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "event queue full, dropping {} event ({dropped} dropped so far)",
                    event.event_type.wire_name()
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("event queue closed, discarding event");
            }
        }
    }
}

/// Event payload as it appears on the wire
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    args: Option<serde_json::Value>,
    #[serde(default)]
    kwargs: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default)]
    traceback: Option<String>,
}

/// Parse one payload into a [`ClusterEvent`].
///
/// Returns `None` (after logging) for malformed payloads, unknown event
/// types, and task events without a task id.
fn parse_event(payload: &[u8]) -> Option<ClusterEvent> {
    let raw: RawEvent = match serde_json::from_slice(payload) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("skipping malformed event payload: {e}");
            return None;
        }
    };

    let Some(event_type) = EventType::from_wire(&raw.event_type) else {
        trace!("ignoring event type {}", raw.event_type);
        return None;
    };

    if event_type.is_task_event() && raw.uuid.is_none() {
        warn!("skipping {} event without task id", raw.event_type);
        return None;
    }

    let timestamp = raw
        .timestamp
        .and_then(epoch_to_datetime)
        .unwrap_or_else(Utc::now);

    Some(ClusterEvent {
        event_type,
        task_id: raw.uuid,
        timestamp,
        hostname: raw.hostname.unwrap_or_default(),
        task_name: raw.name,
        args: raw.args.map(display_value),
        kwargs: raw.kwargs.map(display_value),
        result: raw.result.map(display_value),
        exception: raw.exception,
        traceback: raw.traceback,
    })
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn display_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Handle for the event receiver
///
/// Cloneable; exposes the shared state view and liveness counters
/// without going through the actor task.
#[derive(Clone)]
pub struct EventReceiverHandle {
    sender: mpsc::Sender<ReceiverCommand>,
    state_view: Arc<RwLock<ClusterState>>,
    connection_state: Arc<RwLock<ConnectionState>>,
    dropped_events: Arc<AtomicU64>,
}

impl EventReceiverHandle {
    /// Spawn the receiver actor feeding `event_tx`.
    pub fn spawn(
        source: Box<dyn EventSource>,
        event_tx: mpsc::Sender<ClusterEvent>,
        config: &EventConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let state_view = Arc::new(RwLock::new(ClusterState::new(
            config.max_tasks_in_memory,
            config.max_workers_in_memory,
        )));
        let connection_state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let dropped_events = Arc::new(AtomicU64::new(0));

        let actor = EventReceiverActor {
            source,
            command_rx: cmd_rx,
            event_tx,
            state_view: state_view.clone(),
            connection_state: connection_state.clone(),
            dropped_events: dropped_events.clone(),
            reconnect_floor: Duration::from_secs(config.reconnect_floor_secs).max(MIN_BACKOFF),
            reconnect_cap: Duration::from_secs(config.reconnect_cap_secs).max(MIN_BACKOFF),
        };

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            state_view,
            connection_state,
            dropped_events,
        }
    }

    /// Stop the receiver. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(ReceiverCommand::Shutdown).await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Events lost to a full queue since startup.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the cluster-state view.
    pub async fn state_snapshot(&self) -> StateSnapshot {
        self.state_view.read().await.snapshot()
    }
}
