//! Live event ingestion
//!
//! This module implements the push-based half of the monitoring plane:
//! a long-lived receiver subscribed to the cluster's real-time event
//! feed and a dedicated processor draining a bounded queue.
//!
//! ## Architecture Overview
//!
//! ```text
//!  event feed ──► EventReceiverActor ──► bounded mpsc ──► EventProcessorActor ──► EventSink
//!                      │                 (capacity C,                                (external
//!                      ▼                  overflow = drop)                            persistence)
//!                 ClusterState
//!              (Arc<RwLock>, snapshot reads)
//! ```
//!
//! ## Backpressure
//!
//! The receiver never blocks on the queue: a full queue drops the event
//! and logs a warning. Blocking here would stall the feed connection and
//! risk disconnects, so overflow is absorbed by loss.
//!
//! ## Shutdown
//!
//! `EventPipeline::shutdown` stops both actors. It is idempotent, never
//! deadlocks, and returns within bounded time even when the queue is
//! full or the feed connection is wedged. Events still resident in the
//! queue at shutdown are not drained (at-most-once on shutdown).

pub mod amqp;
pub mod processor;
pub mod receiver;
pub mod state;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ClusterEvent;
use crate::config::EventConfig;

pub use processor::EventProcessorHandle;
pub use receiver::{ConnectionState, EventReceiverHandle};
pub use state::{ClusterState, StateSnapshot, TaskLifecycle, TaskView, WorkerView};

/// A connectable event feed
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a fresh subscription. Called again after every disconnect.
    async fn subscribe(&self) -> anyhow::Result<Box<dyn EventSubscription>>;
}

/// One live subscription to the event feed
#[async_trait]
pub trait EventSubscription: Send {
    /// Next raw event payload. `Ok(None)` means the peer closed the
    /// stream; an error means the transport broke. Payloads are opaque
    /// bytes here - parsing (and skipping malformed input) is the
    /// receiver's job.
    async fn next_raw(&mut self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// Pluggable consumer for delivered events
///
/// This is the seam for the external persistence layer. `process` is
/// invoked at most once per delivered (non-dropped) event, from the
/// processor task only. Errors are logged and never stop the pipeline.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn process(&self, event: &ClusterEvent) -> anyhow::Result<()>;
}

/// Receiver/processor pair wired through one bounded queue
pub struct EventPipeline {
    receiver: EventReceiverHandle,
    processor: EventProcessorHandle,
}

impl EventPipeline {
    /// Spawn both actors.
    pub fn start(
        source: Box<dyn EventSource>,
        sink: Box<dyn EventSink>,
        config: &EventConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity.max(1));

        Self {
            receiver: EventReceiverHandle::spawn(source, event_tx, config),
            processor: EventProcessorHandle::spawn(event_rx, sink),
        }
    }

    pub fn receiver(&self) -> &EventReceiverHandle {
        &self.receiver
    }

    pub fn processor(&self) -> &EventProcessorHandle {
        &self.processor
    }

    /// Stop both actors. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.receiver.shutdown().await;
        self.processor.shutdown().await;
    }
}
