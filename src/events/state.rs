//! In-memory cluster-state view derived from the event stream.
//!
//! The receiver applies every inbound event here before queueing it.
//! Updates are last-write-wins by task id: out-of-order delivery is
//! accepted as-is, not reconciled by timestamp. That is a documented
//! limitation of the feed, not something this view tries to fix.
//!
//! Both maps are bounded. When the task cap is reached the oldest
//! inserted entry is evicted (ring style); workers evict the least
//! recently seen entry.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ClusterEvent, EventType};

/// Coarse lifecycle classification of one tracked task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskLifecycle {
    Received,
    Started,
    Succeeded,
    Failed,
    Retried,
}

impl TaskLifecycle {
    fn from_event(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::TaskReceived => Some(TaskLifecycle::Received),
            EventType::TaskStarted => Some(TaskLifecycle::Started),
            EventType::TaskSucceeded => Some(TaskLifecycle::Succeeded),
            EventType::TaskFailed => Some(TaskLifecycle::Failed),
            EventType::TaskRetried => Some(TaskLifecycle::Retried),
            EventType::WorkerOnline | EventType::WorkerOffline => None,
        }
    }
}

/// Latest known state of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub name: Option<String>,
    pub lifecycle: TaskLifecycle,
    pub hostname: String,
    pub exception: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// Latest known state of one worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    pub hostname: String,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Point-in-time copy of the state view, safe to hold across awaits
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub tasks: HashMap<String, TaskView>,
    pub workers: HashMap<String, WorkerView>,
}

/// Mutable state view owned by the receiver behind a lock
pub struct ClusterState {
    tasks: HashMap<String, TaskView>,
    insertion_order: VecDeque<String>,
    workers: HashMap<String, WorkerView>,
    max_tasks: usize,
    max_workers: usize,
}

impl ClusterState {
    pub fn new(max_tasks: usize, max_workers: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            insertion_order: VecDeque::new(),
            workers: HashMap::new(),
            max_tasks: max_tasks.max(1),
            max_workers: max_workers.max(1),
        }
    }

    /// Apply one event, last write wins.
    pub fn apply(&mut self, event: &ClusterEvent) {
        match event.event_type {
            EventType::WorkerOnline => self.touch_worker(&event.hostname, true, event.timestamp),
            EventType::WorkerOffline => self.touch_worker(&event.hostname, false, event.timestamp),
            _ => {
                // Any task event also proves its worker is there
                if !event.hostname.is_empty() {
                    self.touch_worker(&event.hostname, true, event.timestamp);
                }
                self.apply_task_event(event);
            }
        }
    }

    fn apply_task_event(&mut self, event: &ClusterEvent) {
        let Some(task_id) = event.task_id.as_deref() else {
            return;
        };
        let Some(lifecycle) = TaskLifecycle::from_event(event.event_type) else {
            return;
        };

        if !self.tasks.contains_key(task_id) {
            if self.insertion_order.len() >= self.max_tasks {
                if let Some(evicted) = self.insertion_order.pop_front() {
                    self.tasks.remove(&evicted);
                }
            }
            self.insertion_order.push_back(task_id.to_string());
        }

        let view = TaskView {
            task_id: task_id.to_string(),
            name: event.task_name.clone().or_else(|| {
                self.tasks.get(task_id).and_then(|existing| existing.name.clone())
            }),
            lifecycle,
            hostname: event.hostname.clone(),
            exception: event.exception.clone(),
            last_seen: event.timestamp,
        };
        self.tasks.insert(task_id.to_string(), view);
    }

    fn touch_worker(&mut self, hostname: &str, online: bool, seen: DateTime<Utc>) {
        if !self.workers.contains_key(hostname) && self.workers.len() >= self.max_workers {
            let stalest = self
                .workers
                .values()
                .min_by_key(|w| w.last_seen)
                .map(|w| w.hostname.clone());
            if let Some(stalest) = stalest {
                self.workers.remove(&stalest);
            }
        }

        self.workers.insert(
            hostname.to_string(),
            WorkerView {
                hostname: hostname.to_string(),
                online,
                last_seen: seen,
            },
        );
    }

    /// Point-in-time copy for readers on other tasks.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            taken_at: Utc::now(),
            tasks: self.tasks.clone(),
            workers: self.workers.clone(),
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
