//! # HomeLink Daemon Library
//!
//! Bridges the local MQTT bus to the HomeLink cloud relay over one
//! persistent, encrypted TCP session.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     CloudLink                        │
//! │  connect / handshake / reconnect state machine       │
//! │                                                      │
//! │  ┌────────────────┐      ┌────────────────────────┐  │
//! │  │    Bridge      │      │   Session (protocol)   │  │
//! │  │ subscriptions  │◄────►│  framing + cipher +    │  │
//! │  │ retained cache │      │  key exchange          │  │
//! │  └────────────────┘      └────────────────────────┘  │
//! └───────▲──────────────────────────────▲───────────────┘
//!         │                              │
//!   ┌─────┴──────┐                 ┌─────┴─────┐
//!   │  MqttBus   │                 │ TCP relay │
//!   │ (rumqttc)  │                 │  socket   │
//!   └────────────┘                 └───────────┘
//! ```
//!
//! The `protocol` crate holds everything below the socket boundary; this
//! crate owns configuration, the bus client and the connection lifecycle.

pub mod bridge;
pub mod bus;
pub mod cloud;
pub mod config;

pub use bridge::{topic_matches, Bridge, BridgeEffect};
pub use bus::{BusEvent, MqttBus};
pub use cloud::{CloudLink, RECONNECT_INTERVAL};
pub use config::{Config, ConfigError};
