//! Local MQTT bus client.
//!
//! Thin wrapper around `rumqttc` that gives the rest of the daemon a
//! prefix-free view of the bus: outgoing topics get the configured prefix
//! applied, incoming topics have it stripped before delivery. Messages on
//! foreign prefixes are dropped at this boundary.
//!
//! The wrapper remembers every subscribed pattern and re-issues the whole
//! set each time the broker acknowledges a (re)connection, so bus
//! subscriptions survive broker restarts the same way cloud subscriptions
//! survive relay reconnects.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::MqttConfig;

/// Keep-alive interval for the broker connection.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Pause between event-loop polls after a broker error.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Channel capacity for events delivered to the daemon.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events delivered from the bus to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Broker (re)connection acknowledged; subscriptions were re-issued.
    Connected,
    /// A message arrived on a subscribed topic (prefix already stripped).
    Message {
        /// Bare topic.
        topic: String,
        /// Raw payload bytes.
        payload: Bytes,
    },
}

/// Apply the bus prefix to a bare topic or pattern.
fn prefixed(prefix: &str, topic: &str) -> String {
    if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}/{topic}")
    }
}

/// Strip the bus prefix from a wire topic; `None` for foreign prefixes.
fn strip_prefix<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        Some(topic)
    } else {
        topic
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

/// Handle for publishing and subscribing on the local bus.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    prefix: String,
    /// Prefixed patterns to restore after a broker reconnect.
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

impl MqttBus {
    /// Connect to the broker and spawn the event-loop task.
    ///
    /// Returns the bus handle and the receiver for [`BusEvent`]s. The event
    /// loop keeps reconnecting on its own; broker errors are logged and
    /// retried, never surfaced as fatal.
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::Receiver<BusEvent>) {
        let client_id = format!("homelink-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let bus = Self {
            client: client.clone(),
            prefix: config.prefix.clone(),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
        };

        let task_bus = bus.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!("MQTT connected");
                        task_bus.restore_subscriptions().await;
                        if tx.send(BusEvent::Connected).await.is_err() {
                            return;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(topic) = strip_prefix(&task_bus.prefix, &publish.topic) else {
                            debug!("Ignoring message on foreign topic {}", publish.topic);
                            continue;
                        };
                        let event = BusEvent::Message {
                            topic: topic.to_string(),
                            payload: publish.payload.clone(),
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                    }
                }
            }
        });

        (bus, rx)
    }

    /// Subscribe to a bare topic pattern.
    pub async fn subscribe(&self, pattern: &str) -> Result<()> {
        let full = prefixed(&self.prefix, pattern);
        self.subscriptions.lock().await.insert(full.clone());
        self.client
            .subscribe(&full, QoS::AtMostOnce)
            .await
            .with_context(|| format!("Failed to subscribe to {full}"))
    }

    /// Publish a payload under a bare topic.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let full = prefixed(&self.prefix, topic);
        self.client
            .publish(&full, QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("Failed to publish to {full}"))
    }

    /// Re-issue every remembered subscription after a broker reconnect.
    async fn restore_subscriptions(&self) {
        let patterns: Vec<String> = self.subscriptions.lock().await.iter().cloned().collect();
        for pattern in patterns {
            if let Err(e) = self.client.subscribe(&pattern, QoS::AtMostOnce).await {
                warn!("Failed to restore subscription {pattern}: {e}");
            }
        }
    }
}
