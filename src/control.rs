//! Fan-out command issuer for the worker fleet.
//!
//! Every operation is one broadcast round on the same RPC substrate the
//! inspector uses: bounded timeout, partial replies, no local retries.
//! An empty reply map means no destination answered in time - the
//! command may still have taken effect, and re-issuing is the caller's
//! decision. No node state is cached here, so concurrent commands
//! against disjoint destinations need no coordination.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::CommandReplies;
use crate::transport::{ControlRequest, WorkerTransport};

pub struct ControlPlane {
    transport: Arc<dyn WorkerTransport>,
    timeout: Duration,
}

impl ControlPlane {
    pub fn new(transport: Arc<dyn WorkerTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn issue(
        &self,
        request: ControlRequest,
        destination: Option<&[String]>,
    ) -> CommandReplies {
        debug!(
            "issuing {} to {}",
            request.command,
            destination
                .map(|d| d.join(", "))
                .unwrap_or_else(|| "all workers".to_string())
        );
        self.transport.broadcast(request, destination, self.timeout).await
    }

    /// Restart the worker pools in place.
    pub async fn restart_pool(&self, destination: Option<&[String]>) -> CommandReplies {
        self.issue(ControlRequest::new("pool_restart"), destination).await
    }

    /// Ask workers to finish their current tasks and exit.
    pub async fn shutdown_workers(&self, destination: Option<&[String]>) -> CommandReplies {
        self.issue(ControlRequest::new("shutdown"), destination).await
    }

    /// Add `n` pool processes on each destination.
    pub async fn grow_pool(&self, n: usize, destination: Option<&[String]>) -> CommandReplies {
        self.issue(
            ControlRequest::with_arguments("pool_grow", json!({"n": n})),
            destination,
        )
        .await
    }

    /// Remove `n` pool processes on each destination.
    pub async fn shrink_pool(&self, n: usize, destination: Option<&[String]>) -> CommandReplies {
        self.issue(
            ControlRequest::with_arguments("pool_shrink", json!({"n": n})),
            destination,
        )
        .await
    }

    /// Set the autoscaler bounds on each destination.
    pub async fn set_autoscale(
        &self,
        min: usize,
        max: usize,
        destination: Option<&[String]>,
    ) -> CommandReplies {
        self.issue(
            ControlRequest::with_arguments("autoscale", json!({"min": min, "max": max})),
            destination,
        )
        .await
    }

    /// Revoke tasks by id, optionally terminating a running execution.
    pub async fn revoke_task(
        &self,
        task_ids: &[String],
        terminate: bool,
        destination: Option<&[String]>,
    ) -> CommandReplies {
        self.issue(
            ControlRequest::with_arguments(
                "revoke",
                json!({"task_ids": task_ids, "terminate": terminate}),
            ),
            destination,
        )
        .await
    }

    /// Set the rate limit for one task type, e.g. `"100/m"`.
    pub async fn set_rate_limit(
        &self,
        task_name: &str,
        rate: &str,
        destination: Option<&[String]>,
    ) -> CommandReplies {
        self.issue(
            ControlRequest::with_arguments(
                "rate_limit",
                json!({"task_name": task_name, "rate_limit": rate}),
            ),
            destination,
        )
        .await
    }

    /// Turn on event publishing on each destination.
    pub async fn enable_events(&self, destination: Option<&[String]>) -> CommandReplies {
        self.issue(ControlRequest::new("enable_events"), destination).await
    }

    /// Turn off event publishing on each destination.
    pub async fn disable_events(&self, destination: Option<&[String]>) -> CommandReplies {
        self.issue(ControlRequest::new("disable_events"), destination).await
    }

    /// Discard all waiting messages, returning the total purged count
    /// summed over the nodes that replied.
    pub async fn purge_all_queues(&self, destination: Option<&[String]>) -> u64 {
        let replies = self.issue(ControlRequest::new("purge"), destination).await;

        replies
            .values()
            .filter_map(|reply| reply.get("purged").and_then(|v| v.as_u64()))
            .sum()
    }
}
