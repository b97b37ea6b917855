//! Synchronous fan-out probes against all reachable workers.
//!
//! Each probe is a single bounded-timeout broadcast round. A node that
//! does not reply in time is absent from the result map - that is the
//! normal partial-reply case, never an error for the whole call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::transport::{ControlRequest, WorkerTransport};
use crate::{ActiveTask, WorkerStats, WorkerStatus};

/// Pull-based worker prober
pub struct ClusterInspector {
    transport: Arc<dyn WorkerTransport>,
    timeout: Duration,
}

impl ClusterInspector {
    pub fn new(transport: Arc<dyn WorkerTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// One ping round.
    ///
    /// A hostname maps to `true` iff its reply payload was
    /// `{"ok": "pong"}`. Silent nodes are simply absent.
    pub async fn ping(&self) -> HashMap<String, bool> {
        let replies = self
            .transport
            .broadcast(ControlRequest::new("ping"), None, self.timeout)
            .await;

        replies
            .into_iter()
            .map(|(hostname, reply)| {
                let alive = reply.get("ok").and_then(|v| v.as_str()) == Some("pong");
                (hostname, alive)
            })
            .collect()
    }

    /// One stats round. Replies that do not deserialize are discarded.
    pub async fn stats(&self) -> HashMap<String, WorkerStats> {
        let replies = self
            .transport
            .broadcast(ControlRequest::new("stats"), None, self.timeout)
            .await;

        replies
            .into_iter()
            .filter_map(|(hostname, reply)| {
                match serde_json::from_value::<WorkerStats>(reply) {
                    Ok(stats) => Some((hostname, stats)),
                    Err(e) => {
                        warn!("discarding malformed stats reply from {hostname}: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    /// One active-task-list round.
    pub async fn active(&self) -> HashMap<String, Vec<ActiveTask>> {
        let replies = self
            .transport
            .broadcast(ControlRequest::new("active"), None, self.timeout)
            .await;

        replies
            .into_iter()
            .filter_map(|(hostname, reply)| {
                match serde_json::from_value::<Vec<ActiveTask>>(reply) {
                    Ok(mut tasks) => {
                        for task in &mut tasks {
                            if task.worker.is_empty() {
                                task.worker = hostname.clone();
                            }
                        }
                        Some((hostname, tasks))
                    }
                    Err(e) => {
                        warn!("discarding malformed active reply from {hostname}: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    /// Merge ping, stats and active into one worker list.
    ///
    /// The list is keyed by the union of hostnames seen across the three
    /// probes: a node present in stats but missing from ping is still
    /// reported, marked not alive.
    pub async fn get_workers(&self) -> Vec<WorkerStatus> {
        let (pings, stats, active) = tokio::join!(self.ping(), self.stats(), self.active());

        let mut hostnames: HashSet<String> = pings.keys().cloned().collect();
        hostnames.extend(stats.keys().cloned());
        hostnames.extend(active.keys().cloned());

        let mut workers: Vec<WorkerStatus> = hostnames
            .into_iter()
            .map(|hostname| {
                let is_alive = pings.get(&hostname).copied().unwrap_or(false);
                let worker_stats = stats.get(&hostname).cloned();
                let active_tasks = active.get(&hostname).cloned().unwrap_or_default();

                WorkerStatus {
                    is_alive,
                    active_tasks_count: active_tasks.len(),
                    processed_tasks: worker_stats.as_ref().map(|s| s.processed).unwrap_or(0),
                    stats: worker_stats,
                    active_tasks,
                    hostname,
                }
            })
            .collect();

        workers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        workers
    }
}
