//! Wire message definitions for the cloud session.
//!
//! Decrypted frame plaintext is a JSON object. The device sends
//! [`Credentials`] once right after key derivation and [`Routed`] messages
//! afterwards; the cloud sends [`Request`] objects carrying an `action`.
//! Everything is parsed once here, at the decode boundary, so the bridge
//! never inspects raw JSON fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Authentication message sent once per session, immediately after the
/// session key is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Unique device identifier.
    pub unique_id: String,
    /// Access token for this device.
    pub token: String,
}

/// A bus message routed from the device to the cloud.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Routed {
    /// Bare bus topic (no MQTT prefix).
    pub topic: String,
    /// Message body; omitted on the wire when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

/// Device-to-cloud message payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    /// One-shot authentication message.
    Credentials(Credentials),
    /// Routed bus traffic.
    Routed(Routed),
}

/// Action requested by the cloud.
///
/// Anything other than the two recognized verbs parses to [`Action::Other`]
/// and is ignored downstream; unknown actions are not an error. This also
/// covers the `unsubscribe` verb of older protocol revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Action {
    /// Add a topic pattern to the subscription set.
    Subscribe,
    /// Publish a message onto the local bus.
    Publish,
    /// Unrecognized action, ignored.
    Other,
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "subscribe" => Action::Subscribe,
            "publish" => Action::Publish,
            _ => Action::Other,
        }
    }
}

/// Cloud-to-device request: `{action, topic, message?}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    /// Requested action.
    pub action: Action,
    /// Topic the action applies to.
    pub topic: String,
    /// Optional message body (present for `publish`).
    #[serde(default)]
    pub message: Option<Value>,
}

impl Request {
    /// Parse a decrypted frame payload.
    ///
    /// CBC padding leaves trailing NUL bytes after the JSON value; they are
    /// trimmed before parsing so a correctly formed object always parses.
    pub fn parse(plaintext: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(trim_padding(plaintext))?)
    }
}

/// Strip the zero padding the block cipher appended to the plaintext.
fn trim_padding(plaintext: &[u8]) -> &[u8] {
    let end = plaintext
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &plaintext[..end]
}
