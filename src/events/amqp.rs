//! AMQP implementation of the event feed subscription.
//!
//! Workers publish lifecycle events to a topic exchange (`celeryev` by
//! default) with the event type as routing key, dashes replaced by
//! dots. Filtering happens at the transport layer: the subscription
//! binds an exclusive auto-delete queue once per allow-listed type, so
//! anything else never crosses the wire.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use tracing::debug;

use crate::EventType;

use super::{EventSource, EventSubscription};

const DEFAULT_EVENT_EXCHANGE: &str = "celeryev";

/// Event feed reading from the broker's event exchange
pub struct AmqpEventSource {
    url: String,
    exchange: String,
    event_types: Vec<EventType>,
}

impl AmqpEventSource {
    /// Subscribe to the default event exchange with the full allow-list.
    pub fn new(url: &str) -> Self {
        Self::with_exchange(url, DEFAULT_EVENT_EXCHANGE)
    }

    pub fn with_exchange(url: &str, exchange: &str) -> Self {
        Self {
            url: url.to_string(),
            exchange: exchange.to_string(),
            event_types: EventType::ALL.to_vec(),
        }
    }
}

#[async_trait]
impl EventSource for AmqpEventSource {
    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .context("failed to connect to broker")?;

        let channel = connection
            .create_channel()
            .await
            .context("failed to open channel")?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("failed to declare event exchange")?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("failed to declare subscription queue")?;

        for event_type in &self.event_types {
            channel
                .queue_bind(
                    queue.name().as_str(),
                    &self.exchange,
                    &event_type.routing_key(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .with_context(|| format!("failed to bind {}", event_type.wire_name()))?;
        }

        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "cluster-monitoring",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("failed to start consuming")?;

        debug!(
            "subscribed to {} with {} bindings",
            self.exchange,
            self.event_types.len()
        );

        Ok(Box::new(AmqpEventSubscription {
            _connection: connection,
            consumer,
        }))
    }
}

struct AmqpEventSubscription {
    /// Keeps the connection alive for as long as the subscription lives
    _connection: Connection,

    consumer: lapin::Consumer,
}

#[async_trait]
impl EventSubscription for AmqpEventSubscription {
    async fn next_raw(&mut self) -> Result<Option<Vec<u8>>> {
        match self.consumer.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(e).context("event delivery failed"),
            Some(Ok(delivery)) => Ok(Some(delivery.data)),
        }
    }
}
