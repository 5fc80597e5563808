//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize a wire message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a wire message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    // Handshake errors
    /// Key exchange produced an unusable value.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Attempted to use the session before the handshake completed.
    #[error("handshake incomplete: cannot perform operation before key exchange is finished")]
    HandshakeIncomplete,

    /// The peer's handshake response was shorter than the expected record.
    #[error("short handshake response: need {need} bytes, have {have}")]
    ShortHandshake {
        /// Required response length.
        need: usize,
        /// Bytes actually received.
        have: usize,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_error_display() {
        let err = ProtocolError::Serialization("invalid utf-8".to_string());
        assert_eq!(err.to_string(), "serialization failed: invalid utf-8");
    }

    #[test]
    fn test_deserialization_error_display() {
        let err = ProtocolError::Deserialization("unexpected end of input".to_string());
        assert_eq!(
            err.to_string(),
            "deserialization failed: unexpected end of input"
        );
    }

    #[test]
    fn test_handshake_incomplete_error_display() {
        let err = ProtocolError::HandshakeIncomplete;
        assert_eq!(
            err.to_string(),
            "handshake incomplete: cannot perform operation before key exchange is finished"
        );
    }

    #[test]
    fn test_short_handshake_error_display() {
        let err = ProtocolError::ShortHandshake { need: 4, have: 2 };
        assert_eq!(err.to_string(), "short handshake response: need 4 bytes, have 2");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
