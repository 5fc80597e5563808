//! Per-session symmetric encryption for framed payloads.
//!
//! The key exchange yields a small shared secret; from it the session derives
//! `key = MD5(secret)` and `iv = MD5(key)` (MD5 is used purely as a
//! deterministic 16-byte derivation function, not for integrity). Payloads
//! are zero-padded to the AES block size and encrypted with AES-128-CBC.
//! Each frame is an independent CBC run starting from the session IV, so
//! frames decrypt without depending on their predecessors.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use md5::{Digest, Md5};

use crate::error::{ProtocolError, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size; plaintext is zero-padded to a multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Symmetric key material for one session.
///
/// One key/IV pair exists per session and is never reused across
/// reconnects - the owning session is rebuilt from a fresh key exchange on
/// every transport connect.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Derive the session key and IV from the shared secret bytes.
    pub fn from_secret(secret: &[u8]) -> Self {
        let key: [u8; 16] = Md5::digest(secret).into();
        let iv: [u8; 16] = Md5::digest(key).into();
        Self { key, iv }
    }

    /// Encrypt a payload, zero-padding it to a whole number of blocks.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut buf = plaintext.to_vec();
        let rem = buf.len() % BLOCK_SIZE;
        if rem != 0 {
            buf.resize(buf.len() + BLOCK_SIZE - rem, 0);
        }

        let mut cbc = Aes128CbcEnc::new(&self.key.into(), &self.iv.into());
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            cbc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        buf
    }

    /// Decrypt a framed payload.
    ///
    /// The result is the original plaintext followed by zero or more `0x00`
    /// padding bytes; the message parser tolerates the trailing padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(ProtocolError::Decryption(format!(
                "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
                ciphertext.len()
            )));
        }

        let mut buf = ciphertext.to_vec();
        let mut cbc = Aes128CbcDec::new(&self.key.into(), &self.iv.into());
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            cbc.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(buf)
    }
}
