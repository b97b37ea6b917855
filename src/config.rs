use std::time::Duration;

use tracing::trace;

/// Top-level configuration for the monitoring plane.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Broker URL. Scheme selects the queue-depth backend:
    /// amqp/amqps, redis/rediss/redis+socket/sentinel.
    pub broker_url: String,

    /// Worker agent endpoints reachable for fan-out calls.
    #[serde(default)]
    pub workers: Vec<WorkerEndpoint>,

    #[serde(default = "default_inspect_timeout")]
    pub inspect_timeout_secs: u64,

    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,

    #[serde(default = "default_broker_timeout")]
    pub broker_timeout_secs: u64,

    /// Prefix used for queue-name discovery on list-based brokers.
    #[serde(default = "default_queue_name_prefix")]
    pub queue_name_prefix: String,

    #[serde(default)]
    pub events: EventConfig,
}

impl MonitorConfig {
    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_secs(self.inspect_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WorkerEndpoint {
    /// Hostname the worker reports itself as. Used as the reply map key.
    pub hostname: String,
    /// Base URL of the worker's agent endpoint.
    pub url: String,
    pub token: Option<String>,
}

/// Settings for the event receiver/processor pair.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EventConfig {
    /// Capacity of the bounded queue between receiver and processor.
    /// Overflow is dropped, not blocked on.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on tasks tracked in the in-memory state view.
    #[serde(default = "default_max_tasks_in_memory")]
    pub max_tasks_in_memory: usize,

    /// Upper bound on workers tracked in the in-memory state view.
    #[serde(default = "default_max_workers_in_memory")]
    pub max_workers_in_memory: usize,

    /// First reconnect delay after a transport error.
    #[serde(default = "default_reconnect_floor")]
    pub reconnect_floor_secs: u64,

    /// Reconnect delays double up to this cap. Retries never stop.
    #[serde(default = "default_reconnect_cap")]
    pub reconnect_cap_secs: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_tasks_in_memory: default_max_tasks_in_memory(),
            max_workers_in_memory: default_max_workers_in_memory(),
            reconnect_floor_secs: default_reconnect_floor(),
            reconnect_cap_secs: default_reconnect_cap(),
        }
    }
}

fn default_inspect_timeout() -> u64 {
    5
}

fn default_control_timeout() -> u64 {
    10
}

fn default_broker_timeout() -> u64 {
    10
}

fn default_queue_name_prefix() -> String {
    "celery".to_string()
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_tasks_in_memory() -> usize {
    10_000
}

fn default_max_workers_in_memory() -> usize {
    5_000
}

fn default_reconnect_floor() -> u64 {
    1
}

fn default_reconnect_cap() -> u64 {
    30
}

pub fn read_config_file(path: &str) -> anyhow::Result<MonitorConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
