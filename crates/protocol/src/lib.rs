//! # HomeLink Protocol Library
//!
//! Wire-level building blocks for the HomeLink cloud session. The daemon
//! crate owns sockets and timers; everything here is pure state and byte
//! transforms, which keeps the protocol independently testable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application Messages             │  JSON (serde_json)
//! ├─────────────────────────────────────────┤
//! │        Session Cipher                   │  AES-128-CBC, MD5-derived key/IV
//! ├─────────────────────────────────────────┤
//! │        Framing                          │  byte-stuffed, 0x42/0x43/0x44
//! ├─────────────────────────────────────────┤
//! │        Transport (TCP, in the daemon)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: byte-stuffed frame codec and streaming reassembly
//! - [`cipher`]: per-session AES-128-CBC with MD5 key derivation
//! - [`exchange`]: 32-bit Diffie-Hellman key exchange and hello record
//! - [`session`]: per-connection handshake state machine
//! - [`messages`]: wire message definitions
//! - [`error`]: error types

pub mod cipher;
pub mod error;
pub mod exchange;
pub mod framing;
pub mod messages;
pub mod session;

pub use cipher::{SessionCipher, BLOCK_SIZE};
pub use error::{ProtocolError, Result};
pub use exchange::{KeyExchange, GENERATOR, HELLO_LEN, PRIME, RESPONSE_LEN};
pub use framing::{FrameBuffer, END, ESCAPE, START};
pub use messages::{Action, Credentials, Outbound, Request, Routed};
pub use session::{Phase, Session, SessionEvent};
