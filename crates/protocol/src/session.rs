//! Per-connection session state machine.
//!
//! A [`Session`] is created fresh on every successful transport connect and
//! dropped on disconnect or error; key material never survives a reconnect.
//! The connection-level states (disconnected, connecting, retry timer) live
//! in the daemon's connection manager - the session covers everything after
//! the socket is up:
//!
//! ```text
//! KeyExchange --(peer public value)--> Authenticating --(credentials sent)--> Ready
//! ```
//!
//! Reaching `Ready` is optimistic: the protocol has no acknowledgement for
//! the credentials message, so a rejected token only ever shows up as the
//! far side closing the connection.

use rand::Rng;

use crate::cipher::SessionCipher;
use crate::error::{ProtocolError, Result};
use crate::exchange::{KeyExchange, HELLO_LEN, RESPONSE_LEN};
use crate::framing::{self, FrameBuffer};
use crate::messages::{Credentials, Outbound, Request};

/// Handshake progress for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Hello sent, waiting for the peer's public value.
    KeyExchange,
    /// Key derived, credentials being sent.
    Authenticating,
    /// Authenticated channel; inbound bytes are framed ciphertext.
    Ready,
}

/// Output of feeding inbound transport bytes into the session.
#[derive(Debug, PartialEq)]
pub enum SessionEvent {
    /// Wire bytes that must be written to the transport.
    Transmit(Vec<u8>),
    /// A decoded cloud request for the bridge.
    Request(Request),
}

/// One transport connection's worth of handshake and cipher state.
pub struct Session {
    exchange: KeyExchange,
    cipher: Option<SessionCipher>,
    phase: Phase,
    credentials: Credentials,
    /// Raw pre-handshake accumulator; a short first read stays here until
    /// the full peer value has arrived.
    pending: Vec<u8>,
    /// Framed-ciphertext reassembly buffer, used once `Ready`.
    frames: FrameBuffer,
    /// Frames that failed to decrypt or parse and were dropped.
    dropped: u64,
}

impl Session {
    /// Create a session with a fresh ephemeral key pair.
    pub fn new<R: Rng>(rng: &mut R, credentials: Credentials) -> Self {
        Self {
            exchange: KeyExchange::generate(rng),
            cipher: None,
            phase: Phase::KeyExchange,
            credentials,
            pending: Vec::new(),
            frames: FrameBuffer::new(),
            dropped: 0,
        }
    }

    /// The 12-byte hello record to send immediately after connect.
    pub fn hello(&self) -> [u8; HELLO_LEN] {
        self.exchange.hello()
    }

    /// Current handshake phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the authenticated channel is established.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Count of inbound frames dropped as malformed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Feed bytes received from the transport through the state machine.
    ///
    /// In `KeyExchange` this consumes the peer's public value, derives the
    /// session cipher and emits the encrypted credentials frame to transmit.
    /// In `Ready` it runs framing, decryption and parsing; frames whose
    /// plaintext is not a well-formed request are dropped, not fatal.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<Vec<SessionEvent>> {
        let mut events = Vec::new();

        if self.phase == Phase::KeyExchange {
            self.pending.extend_from_slice(bytes);
            if self.pending.len() < RESPONSE_LEN {
                return Ok(events);
            }

            let secret = self.exchange.shared_secret(&self.pending)?;
            self.cipher = Some(SessionCipher::from_secret(&secret));
            self.phase = Phase::Authenticating;

            let credentials = Outbound::Credentials(self.credentials.clone());
            events.push(SessionEvent::Transmit(self.seal(&credentials)?));
            self.phase = Phase::Ready;

            // Anything past the 4-byte response is already framed traffic.
            let leftover = self.pending.split_off(RESPONSE_LEN);
            self.pending.clear();
            self.frames.extend(&leftover);
        } else {
            self.frames.extend(bytes);
        }

        while let Some(payload) = self.frames.next_payload() {
            match self.open(&payload) {
                Some(request) => events.push(SessionEvent::Request(request)),
                None => self.dropped += 1,
            }
        }

        Ok(events)
    }

    /// Encrypt and frame an outbound message.
    ///
    /// Fails with [`ProtocolError::HandshakeIncomplete`] before the key
    /// exchange has produced a cipher.
    pub fn seal(&self, message: &Outbound) -> Result<Vec<u8>> {
        let cipher = self.cipher.as_ref().ok_or(ProtocolError::HandshakeIncomplete)?;
        let plaintext = serde_json::to_vec(message)?;
        Ok(framing::encode(&cipher.encrypt(&plaintext)))
    }

    /// Decrypt and parse one framed payload; `None` means the frame was
    /// malformed and is silently discarded.
    fn open(&self, payload: &[u8]) -> Option<Request> {
        let cipher = self.cipher.as_ref()?;
        let plaintext = cipher.decrypt(payload).ok()?;
        Request::parse(&plaintext).ok()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("buffered", &self.frames.len())
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}
