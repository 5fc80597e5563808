//! Cloud connection lifecycle manager.
//!
//! Owns the TCP connection to the relay, the per-connection [`Session`] and
//! the [`Bridge`]. All connection events - socket reads, bus messages, the
//! reconnect timer - are handled in one sequential task, so session state,
//! the subscription set and the retained cache are never touched
//! concurrently.
//!
//! Reconnection policy: every disconnect or connect error is followed by a
//! fixed 10 second wait and another attempt, unconditionally and without a
//! retry cap - the relay is expected to be intermittently reachable over
//! long device uptimes. While waiting, bus traffic keeps flowing into the
//! retained cache so a reconnecting subscriber sees current state.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use protocol::messages::{Credentials, Outbound, Routed};
use protocol::session::{Session, SessionEvent};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, BridgeEffect};
use crate::bus::{BusEvent, MqttBus};
use crate::config::Config;

/// Fixed delay between reconnection attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 4096;

/// Decode a bus payload as JSON; unparsable payloads degrade to an empty
/// object and still flow through caching and forwarding.
fn parse_payload(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap_or_else(|_| Value::Object(Default::default()))
}

/// Relay connection manager and event loop.
pub struct CloudLink {
    host: String,
    port: u16,
    credentials: Credentials,
    bridge: Bridge,
    bus: MqttBus,
    bus_events: tokio::sync::mpsc::Receiver<BusEvent>,
}

impl CloudLink {
    /// Build the manager from configuration.
    ///
    /// Returns `None` when the device identity is not configured; the
    /// condition is fatal to the feature, reported once and never retried.
    pub fn new(
        config: &Config,
        bus: MqttBus,
        bus_events: tokio::sync::mpsc::Receiver<BusEvent>,
    ) -> Option<Self> {
        if !config.has_cloud_identity() {
            warn!("Unique ID or Token is empty, cloud connection disabled");
            return None;
        }
        let unique_id = config.cloud.unique_id.clone().unwrap_or_default();
        let token = config.cloud.token.clone().unwrap_or_default();

        Some(Self {
            host: config.cloud.host.clone(),
            port: config.cloud.port,
            credentials: Credentials { unique_id, token },
            bridge: Bridge::new(config.cloud.retained_categories.clone()),
            bus,
            bus_events,
        })
    }

    /// Run the connect/drive/wait loop forever.
    pub async fn run(mut self) {
        loop {
            match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(stream) => {
                    info!("Connected to server");
                    if let Err(e) = self.drive(stream).await {
                        warn!("Server connection error: {e:#}");
                    }
                    info!("Disconnected from server");
                }
                Err(e) => warn!("Server connection failed: {e}"),
            }

            // Session (and its key material) is already dropped here; the
            // next attempt starts a fresh handshake.
            self.idle_wait().await;
        }
    }

    /// Drive one established connection until it fails or closes.
    async fn drive(&mut self, mut stream: TcpStream) -> Result<()> {
        let mut session = Session::new(&mut rand::thread_rng(), self.credentials.clone());
        stream
            .write_all(&session.hello())
            .await
            .context("Failed to send handshake hello")?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let n = read.context("Socket read failed")?;
                    if n == 0 {
                        bail!("connection closed by server");
                    }
                    let events = session.receive(&buf[..n])?;
                    for event in events {
                        self.on_session_event(event, &mut session, &mut stream).await?;
                    }
                }
                event = self.bus_events.recv() => {
                    let Some(event) = event else {
                        bail!("bus event channel closed");
                    };
                    self.on_bus_event(event, &mut session, &mut stream).await?;
                }
            }
        }
    }

    async fn on_session_event(
        &mut self,
        event: SessionEvent,
        session: &mut Session,
        stream: &mut TcpStream,
    ) -> Result<()> {
        match event {
            SessionEvent::Transmit(wire) => {
                stream
                    .write_all(&wire)
                    .await
                    .context("Failed to send handshake credentials")?;
                debug!("Credentials sent, session ready");
            }
            SessionEvent::Request(request) => {
                debug!(topic = %request.topic, action = ?request.action, "Cloud request");
                for effect in self.bridge.handle_request(request) {
                    self.apply(effect, session, stream).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply(
        &mut self,
        effect: BridgeEffect,
        session: &mut Session,
        stream: &mut TcpStream,
    ) -> Result<()> {
        match effect {
            BridgeEffect::SendToCloud(routed) => {
                self.send(routed, session, stream).await?;
            }
            BridgeEffect::SubscribeLocal(pattern) => {
                if let Err(e) = self.bus.subscribe(&pattern).await {
                    warn!("Bus subscribe failed: {e:#}");
                }
            }
            BridgeEffect::PublishLocal { topic, message } => {
                let payload = serde_json::to_vec(&message)
                    .context("Failed to serialize bus message")?;
                if let Err(e) = self.bus.publish(&topic, payload).await {
                    warn!("Bus publish failed: {e:#}");
                }
            }
        }
        Ok(())
    }

    async fn on_bus_event(
        &mut self,
        event: BusEvent,
        session: &mut Session,
        stream: &mut TcpStream,
    ) -> Result<()> {
        match event {
            BusEvent::Connected => {
                debug!("Local bus connected");
            }
            BusEvent::Message { topic, payload } => {
                let message = parse_payload(&payload);
                if let Some(routed) = self.bridge.handle_local(&topic, &message, session.is_ready())
                {
                    self.send(routed, session, stream).await?;
                }
            }
        }
        Ok(())
    }

    /// Seal and write one routed message; transport failures propagate into
    /// the reconnect path, anything else is logged and dropped.
    async fn send(
        &mut self,
        routed: Routed,
        session: &mut Session,
        stream: &mut TcpStream,
    ) -> Result<()> {
        match session.seal(&Outbound::Routed(routed)) {
            Ok(wire) => stream
                .write_all(&wire)
                .await
                .context("Socket write failed"),
            Err(e) => {
                warn!("Failed to seal outbound message: {e}");
                Ok(())
            }
        }
    }

    /// Wait out the reconnect interval while keeping the retained cache
    /// warm from bus traffic (no session, so nothing is forwarded).
    async fn idle_wait(&mut self) {
        let delay = tokio::time::sleep(RECONNECT_INTERVAL);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return,
                event = self.bus_events.recv() => {
                    match event {
                        Some(BusEvent::Message { topic, payload }) => {
                            let message = parse_payload(&payload);
                            self.bridge.handle_local(&topic, &message, false);
                        }
                        Some(BusEvent::Connected) => {}
                        None => return,
                    }
                }
            }
        }
    }
}
