//! EventProcessorActor - drains the bounded queue into the sink
//!
//! A single dedicated consumer: events are handed to the pluggable
//! [`EventSink`](super::EventSink) one at a time, from this task only.
//! A failing sink is logged and skipped - one bad record must not halt
//! processing of subsequent ones. On stop the loop finishes its current
//! iteration and exits; whatever is still resident in the queue is not
//! drained (at-most-once on shutdown).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::ClusterEvent;

use super::EventSink;

#[derive(Debug)]
enum ProcessorCommand {
    Shutdown,
}

/// Actor owning the consumer side of the bounded queue
pub struct EventProcessorActor {
    /// Bounded queue fed by the receiver
    event_rx: mpsc::Receiver<ClusterEvent>,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<ProcessorCommand>,

    sink: Box<dyn EventSink>,

    processed_events: Arc<AtomicU64>,
    sink_errors: Arc<AtomicU64>,
}

impl EventProcessorActor {
    /// Run the actor's main loop
    ///
    /// Exits on a Shutdown command, when the command channel closes, or
    /// when the queue's producer side is gone.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting event processor");

        loop {
            let next = tokio::select! {
                _ = self.command_rx.recv() => None,
                maybe_event = self.event_rx.recv() => maybe_event,
            };

            let Some(event) = next else {
                break;
            };

            if let Err(e) = self.sink.process(&event).await {
                self.sink_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event sink failed on {} event: {e:#}",
                    event.event_type.wire_name()
                );
            } else {
                self.processed_events.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!("event processor stopped");
    }
}

/// Handle for the event processor
#[derive(Clone)]
pub struct EventProcessorHandle {
    sender: mpsc::Sender<ProcessorCommand>,
    processed_events: Arc<AtomicU64>,
    sink_errors: Arc<AtomicU64>,
}

impl EventProcessorHandle {
    /// Spawn the processor actor draining `event_rx`.
    pub fn spawn(event_rx: mpsc::Receiver<ClusterEvent>, sink: Box<dyn EventSink>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let processed_events = Arc::new(AtomicU64::new(0));
        let sink_errors = Arc::new(AtomicU64::new(0));

        let actor = EventProcessorActor {
            event_rx,
            command_rx: cmd_rx,
            sink,
            processed_events: processed_events.clone(),
            sink_errors: sink_errors.clone(),
        };

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            processed_events,
            sink_errors,
        }
    }

    /// Stop the processor. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(ProcessorCommand::Shutdown).await;
    }

    /// Events handed to the sink successfully.
    pub fn processed_events(&self) -> u64 {
        self.processed_events.load(Ordering::Relaxed)
    }

    /// Sink invocations that returned an error.
    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }
}
