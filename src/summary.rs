//! Aggregated cluster snapshot for external consumers.
//!
//! Pure composition: one worker sweep plus one queue probe, no other
//! I/O. The resulting document is plain serde data, ready for whatever
//! presentation layer sits on top.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::broker::{BrokerMonitor, BrokerOptions, BrokerResult, broker_monitor_for_url};
use crate::config::MonitorConfig;
use crate::control::ControlPlane;
use crate::inspector::ClusterInspector;
use crate::transport::{HttpWorkerTransport, WorkerTransport};
use crate::{BrokerStats, WorkerStatus};

/// Worker totals in one snapshot
#[derive(Debug, Clone, Serialize)]
pub struct WorkerTotals {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
    pub active_tasks: usize,
    pub total_processed: u64,
}

/// One consistent read over workers and queues
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub timestamp: DateTime<Utc>,
    pub workers: WorkerTotals,
    pub queues: BrokerStats,
    pub workers_detail: Vec<WorkerStatus>,
}

/// Facade composing the pull-based probes
pub struct ClusterMonitor {
    broker: Box<dyn BrokerMonitor>,
    inspector: ClusterInspector,
}

impl ClusterMonitor {
    pub fn new(broker: Box<dyn BrokerMonitor>, inspector: ClusterInspector) -> Self {
        Self { broker, inspector }
    }

    /// Build one summary.
    ///
    /// Individual worker probe failures are absorbed into the worker
    /// list; an unreachable broker is the one loud failure here and
    /// propagates to the caller.
    pub async fn summary(&self) -> BrokerResult<ClusterSummary> {
        let (workers_detail, queues) =
            tokio::join!(self.inspector.get_workers(), self.broker.queue_lengths(None));

        Ok(summarize(workers_detail, queues?))
    }

    pub fn inspector(&self) -> &ClusterInspector {
        &self.inspector
    }

    pub fn broker(&self) -> &dyn BrokerMonitor {
        self.broker.as_ref()
    }
}

/// Build the pull-based plane from one config document.
///
/// The inspector and control plane share one transport; the broker
/// backend is picked by the URL scheme. No network I/O happens here.
pub fn monitor_from_config(
    config: &MonitorConfig,
) -> BrokerResult<(ClusterMonitor, ControlPlane)> {
    let transport: Arc<dyn WorkerTransport> =
        Arc::new(HttpWorkerTransport::new(config.workers.clone()));

    let broker = broker_monitor_for_url(
        &config.broker_url,
        BrokerOptions {
            timeout: config.broker_timeout(),
            queue_name_prefix: config.queue_name_prefix.clone(),
        },
    )?;

    let inspector = ClusterInspector::new(transport.clone(), config.inspect_timeout());
    let control = ControlPlane::new(transport, config.control_timeout());

    Ok((ClusterMonitor::new(broker, inspector), control))
}

fn summarize(workers_detail: Vec<WorkerStatus>, queues: BrokerStats) -> ClusterSummary {
    let alive = workers_detail.iter().filter(|w| w.is_alive).count();

    ClusterSummary {
        timestamp: Utc::now(),
        workers: WorkerTotals {
            total: workers_detail.len(),
            alive,
            dead: workers_detail.len() - alive,
            active_tasks: workers_detail.iter().map(|w| w.active_tasks_count).sum(),
            total_processed: workers_detail.iter().map(|w| w.processed_tasks).sum(),
        },
        queues,
        workers_detail,
    }
}
