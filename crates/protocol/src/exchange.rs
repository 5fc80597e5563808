//! Diffie-Hellman key exchange over 32-bit values.
//!
//! The cloud protocol negotiates its session secret with a deliberately
//! small DH group: prime, generator and both public values are 32-bit
//! unsigned integers. The device opens every connection by sending a fixed
//! 12-byte record (`prime`, `generator`, `public`, each big-endian) and
//! reads the peer's 32-bit public value back. This is obfuscation-grade key
//! agreement inherited from the wire protocol, not modern cryptography; the
//! group parameters are pinned by the protocol, not negotiated.

use rand::Rng;

use crate::error::{ProtocolError, Result};

/// Public prime modulus sent in the hello record. 2^32 - 5, the largest
/// 32-bit prime.
pub const PRIME: u32 = 0xFFFF_FFFB;

/// Public generator sent in the hello record.
pub const GENERATOR: u32 = 2;

/// Size of the handshake hello record: three big-endian u32 values.
pub const HELLO_LEN: usize = 12;

/// Size of the expected peer response: one big-endian u32 public value.
pub const RESPONSE_LEN: usize = 4;

/// Modular exponentiation; modulus fits in u32 so products fit in u64.
fn mod_pow(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut acc = 1u64;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % modulus;
        }
        base = base * base % modulus;
        exp >>= 1;
    }
    acc
}

/// Ephemeral key-exchange material for one session.
///
/// A fresh pair is generated on every transport connect; material from a
/// prior connection is never reused.
pub struct KeyExchange {
    private: u32,
    public: u32,
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchange")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl KeyExchange {
    /// Generate a fresh ephemeral key pair.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let private = rng.gen_range(2..PRIME - 1);
        Self::from_private(private)
    }

    /// Build the pair from an explicit private exponent (tests).
    fn from_private(private: u32) -> Self {
        let public = mod_pow(GENERATOR as u64, private as u64, PRIME as u64) as u32;
        Self { private, public }
    }

    /// This side's public value.
    pub fn public(&self) -> u32 {
        self.public
    }

    /// The 12-byte hello record sent right after the transport connects:
    /// `prime`, `generator` and our public value, each big-endian.
    pub fn hello(&self) -> [u8; HELLO_LEN] {
        let mut record = [0u8; HELLO_LEN];
        record[0..4].copy_from_slice(&PRIME.to_be_bytes());
        record[4..8].copy_from_slice(&GENERATOR.to_be_bytes());
        record[8..12].copy_from_slice(&self.public.to_be_bytes());
        record
    }

    /// Compute the shared secret from the peer's raw response bytes.
    ///
    /// The peer's public value is the first [`RESPONSE_LEN`] bytes of the
    /// first read after connect, big-endian. The secret is returned in
    /// little-endian byte order; key derivation hashes the value as it sits
    /// in memory on the relay side, not as it would travel on the wire.
    pub fn shared_secret(&self, response: &[u8]) -> Result<[u8; 4]> {
        if response.len() < RESPONSE_LEN {
            return Err(ProtocolError::ShortHandshake {
                need: RESPONSE_LEN,
                have: response.len(),
            });
        }

        let peer = u32::from_be_bytes([response[0], response[1], response[2], response[3]]);
        if peer == 0 {
            return Err(ProtocolError::HandshakeFailed(
                "peer public value is zero".to_string(),
            ));
        }

        let secret = mod_pow(peer as u64, self.private as u64, PRIME as u64) as u32;
        Ok(secret.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_pow_basics() {
        assert_eq!(mod_pow(2, 10, 1_000_000), 1024);
        assert_eq!(mod_pow(7, 0, 13), 1);
        assert_eq!(mod_pow(0, 5, 13), 0);
        assert_eq!(mod_pow(10, 1, 7), 3);
    }

    #[test]
    fn test_mod_pow_fermat() {
        // a^(p-1) = 1 mod p for prime p and a not divisible by p.
        assert_eq!(mod_pow(12345, (PRIME - 1) as u64, PRIME as u64), 1);
    }

    #[test]
    fn test_hello_record_layout() {
        let exchange = KeyExchange::from_private(1000);
        let hello = exchange.hello();

        assert_eq!(hello.len(), HELLO_LEN);
        assert_eq!(&hello[0..4], &PRIME.to_be_bytes());
        assert_eq!(&hello[4..8], &GENERATOR.to_be_bytes());
        assert_eq!(&hello[8..12], &exchange.public().to_be_bytes());
    }

    #[test]
    fn test_both_sides_agree_on_secret() {
        let device = KeyExchange::from_private(123_456);
        let cloud = KeyExchange::from_private(654_321);

        let device_secret = device
            .shared_secret(&cloud.public().to_be_bytes())
            .unwrap();
        let cloud_secret = cloud
            .shared_secret(&device.public().to_be_bytes())
            .unwrap();

        assert_eq!(device_secret, cloud_secret);
    }

    #[test]
    fn test_distinct_pairs_distinct_secrets() {
        // Two exchange runs against the same peer must not derive the same
        // secret; this is what forbids key reuse across reconnects.
        let peer = KeyExchange::from_private(777);
        let first = KeyExchange::from_private(1001);
        let second = KeyExchange::from_private(2002);

        let a = first.shared_secret(&peer.public().to_be_bytes()).unwrap();
        let b = second.shared_secret(&peer.public().to_be_bytes()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_uses_fresh_material() {
        let mut rng = rand::thread_rng();
        let a = KeyExchange::generate(&mut rng);
        let b = KeyExchange::generate(&mut rng);
        // Collisions are possible in a 32-bit group but vanishingly unlikely.
        assert_ne!(a.private, b.private);
    }

    #[test]
    fn test_secret_bytes_are_little_endian() {
        // Key derivation must see the secret's little-endian bytes; the
        // big-endian layout would derive a different key and IV for any
        // non-palindromic value, breaking interop with the relay.
        let device = KeyExchange::from_private(123_456);
        let cloud = KeyExchange::from_private(654_321);

        let secret = device
            .shared_secret(&cloud.public().to_be_bytes())
            .unwrap();
        let value = mod_pow(cloud.public() as u64, 123_456, PRIME as u64) as u32;
        assert_eq!(secret, value.to_le_bytes());
        assert_ne!(secret, value.to_be_bytes(), "chosen value must not be palindromic");
    }

    #[test]
    fn test_short_response_rejected() {
        let exchange = KeyExchange::from_private(42);
        let err = exchange.shared_secret(&[0x01, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortHandshake { need: 4, have: 2 }
        ));
    }

    #[test]
    fn test_zero_peer_value_rejected() {
        let exchange = KeyExchange::from_private(42);
        let err = exchange.shared_secret(&[0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeFailed(_)));
    }

    #[test]
    fn test_extra_response_bytes_ignored() {
        let device = KeyExchange::from_private(31337);
        let cloud = KeyExchange::from_private(2718);

        let mut response = cloud.public().to_be_bytes().to_vec();
        response.extend_from_slice(&[0xAA, 0xBB]);

        let with_extra = device.shared_secret(&response).unwrap();
        let exact = device
            .shared_secret(&cloud.public().to_be_bytes())
            .unwrap();
        assert_eq!(with_extra, exact);
    }
}
