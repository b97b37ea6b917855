//! Fan-out RPC substrate shared by the inspector and the control plane.
//!
//! One broadcast is a join over per-node futures with a shared deadline:
//! every destination is called concurrently, and whichever replies
//! arrive in time end up in the result map. A node that errors or times
//! out is simply absent - partial replies are the normal case, not an
//! error, and no retries happen at this layer.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, trace};

use crate::CommandReplies;
use crate::config::WorkerEndpoint;

/// One remote command, broadcast verbatim to every destination node
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    pub command: String,
    pub arguments: serde_json::Value,
}

impl ControlRequest {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            arguments: serde_json::Value::Null,
        }
    }

    pub fn with_arguments(command: &str, arguments: serde_json::Value) -> Self {
        Self {
            command: command.to_string(),
            arguments,
        }
    }
}

/// Transport used to reach worker nodes
///
/// `broadcast` never fails as a whole: unreachable nodes are excluded
/// from the reply map and the command may still take effect on them
/// asynchronously. Callers decide whether to re-issue.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Send `request` to every destination (or the given subset) and
    /// collect the replies that arrive before the deadline.
    async fn broadcast(
        &self,
        request: ControlRequest,
        destination: Option<&[String]>,
        timeout: Duration,
    ) -> CommandReplies;
}

/// Transport that POSTs commands to per-worker agent endpoints
pub struct HttpWorkerTransport {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,

    endpoints: Vec<WorkerEndpoint>,
}

impl HttpWorkerTransport {
    pub fn new(endpoints: Vec<WorkerEndpoint>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            endpoints,
        }
    }

    async fn call_node(
        &self,
        endpoint: &WorkerEndpoint,
        request: &ControlRequest,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/control", endpoint.url.trim_end_matches('/'));

        let mut http_request = self.client.post(&url).json(request);

        if let Some(token) = &endpoint.token {
            http_request = http_request.header("X-MONITORING-SECRET", token);
        }

        let response = http_request
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        response.json().await.context("failed to parse reply body")
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerTransport {
    async fn broadcast(
        &self,
        request: ControlRequest,
        destination: Option<&[String]>,
        timeout: Duration,
    ) -> CommandReplies {
        let targets: Vec<&WorkerEndpoint> = match destination {
            Some(hostnames) => self
                .endpoints
                .iter()
                .filter(|e| hostnames.contains(&e.hostname))
                .collect(),
            None => self.endpoints.iter().collect(),
        };

        trace!(
            "broadcasting {} to {} node(s)",
            request.command,
            targets.len()
        );

        let request = &request;
        let calls = targets.into_iter().map(|endpoint| async move {
            match tokio::time::timeout(timeout, self.call_node(endpoint, request)).await {
                Ok(Ok(reply)) => Some((endpoint.hostname.clone(), reply)),
                Ok(Err(e)) => {
                    debug!(
                        "{} did not answer {}: {e:#}",
                        endpoint.hostname, request.command
                    );
                    None
                }
                Err(_) => {
                    trace!("{} timed out on {}", endpoint.hostname, request.command);
                    None
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }
}
