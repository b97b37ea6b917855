pub mod broker;
pub mod config;
pub mod control;
pub mod events;
pub mod inspector;
pub mod summary;
pub mod transport;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-node acknowledgement payloads collected in one fan-out round.
///
/// A hostname that is absent from the map sent no reply before the
/// deadline. That is not necessarily a failure - the command may still
/// have taken effect on the node.
pub type CommandReplies = HashMap<String, serde_json::Value>;

/// Combined view of a single worker, merged from one round of
/// ping/stats/active probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub hostname: String,
    /// Derived from the most recent ping round only. A worker that did
    /// not answer that round is reported as not alive, never omitted.
    pub is_alive: bool,
    pub active_tasks_count: usize,
    pub processed_tasks: u64,
    pub stats: Option<WorkerStats>,
    pub active_tasks: Vec<ActiveTask>,
}

/// Counters and pool settings reported by a worker's stats probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub concurrency: usize,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub cancelled: u64,
    #[serde(default)]
    pub load_average: f64,
    #[serde(default)]
    pub prefetch_count: u32,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default = "default_pool_type")]
    pub pool_type: String,
}

fn default_pool_type() -> String {
    "prefork".to_string()
}

/// A task currently executing on a worker, as reported by the active
/// probe. Exists only for as long as it appears in the worker's list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub kwargs: serde_json::Value,
    /// Hostname of the worker executing the task.
    #[serde(default)]
    pub worker: String,
    /// Start time as epoch seconds, if the worker reported one.
    #[serde(default)]
    pub time_start: Option<f64>,
}

/// Depth and consumer information for one named queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    #[serde(default)]
    pub messages_ready: u64,
    #[serde(default)]
    pub messages_unacknowledged: u64,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub consumers: u64,
    #[serde(default = "default_queue_state")]
    pub state: String,
}

fn default_queue_state() -> String {
    "running".to_string()
}

/// One broker probe's view of all queues. Best-effort and eventually
/// consistent - there is no read-after-write guarantee across probes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerStats {
    pub queues: Vec<QueueInfo>,
    pub total_messages: u64,
    pub total_consumers: u64,
}

/// The fixed allow-list of event types the receiver subscribes to.
/// Everything else is filtered out at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    TaskReceived,
    TaskStarted,
    TaskSucceeded,
    TaskFailed,
    TaskRetried,
    WorkerOnline,
    WorkerOffline,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::TaskReceived,
        EventType::TaskStarted,
        EventType::TaskSucceeded,
        EventType::TaskFailed,
        EventType::TaskRetried,
        EventType::WorkerOnline,
        EventType::WorkerOffline,
    ];

    /// Wire name as it appears in the event feed's `type` field.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventType::TaskReceived => "task-received",
            EventType::TaskStarted => "task-started",
            EventType::TaskSucceeded => "task-succeeded",
            EventType::TaskFailed => "task-failed",
            EventType::TaskRetried => "task-retried",
            EventType::WorkerOnline => "worker-online",
            EventType::WorkerOffline => "worker-offline",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        EventType::ALL.into_iter().find(|t| t.wire_name() == name)
    }

    /// Events are published with the dashes in the type replaced by dots.
    pub fn routing_key(&self) -> String {
        self.wire_name().replace('-', ".")
    }

    pub fn is_task_event(&self) -> bool {
        !matches!(self, EventType::WorkerOnline | EventType::WorkerOffline)
    }
}

/// A single task/worker lifecycle transition delivered by the event feed.
///
/// Ephemeral: the only trace the library retains is the in-memory state
/// view it updates and whatever the configured sink persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub event_type: EventType,
    /// Task uuid. `None` for worker-online/worker-offline events.
    pub task_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Hostname of the worker that reported the event.
    pub hostname: String,
    pub task_name: Option<String>,
    pub args: Option<String>,
    pub kwargs: Option<String>,
    pub result: Option<String>,
    pub exception: Option<String>,
    pub traceback: Option<String>,
}
