//! Payload encryption
//!
//! AES-256-GCM with the key derived as SHA-256 of the configured secret.
//! The wire layout is `nonce || ciphertext || tag` with a fresh random
//! 96-bit nonce per message; the 16-byte tag is appended by the cipher.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Nonce length in bytes (96 bits, the GCM standard size).
const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Errors from encrypting or decrypting payloads
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key setup failed
    #[error("unable to derive cipher key")]
    Key,

    /// Encryption failed
    #[error("encryption failed")]
    Encrypt,

    /// Authentication failed or the ciphertext is corrupt
    #[error("decryption failed")]
    Decrypt,

    /// Input shorter than nonce + tag
    #[error("ciphertext of {len} bytes is too short")]
    TooShort { len: usize },
}

/// Reusable cipher bound to one secret.
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    /// Derive a cipher from a shared secret.
    pub fn new(secret: &str) -> Result<Self, CipherError> {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CipherError::Key)?;
        Ok(Self { cipher })
    }

    /// Encrypt a payload, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Decrypt a `nonce || ciphertext || tag` payload.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::TooShort { len: data.len() });
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

/// One-shot helper: encrypt with a secret.
pub fn encrypt(plaintext: &[u8], secret: &str) -> Result<Vec<u8>, CipherError> {
    PayloadCipher::new(secret)?.encrypt(plaintext)
}

/// One-shot helper: decrypt with a secret.
pub fn decrypt(data: &[u8], secret: &str) -> Result<Vec<u8>, CipherError> {
    PayloadCipher::new(secret)?.decrypt(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let plaintext = b"change event payload";
        let encrypted = encrypt(plaintext, "secret-1").unwrap();
        assert_ne!(&encrypted[NONCE_LEN..], plaintext.as_slice());

        let decrypted = decrypt(&encrypted, "secret-1").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let encrypted = encrypt(b"payload", "secret-1").unwrap();
        let err = decrypt(&encrypted, "secret-2").unwrap_err();
        assert!(matches!(err, CipherError::Decrypt));
    }

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let cipher = PayloadCipher::new("secret").unwrap();
        let a = cipher.encrypt(b"same payload").unwrap();
        let b = cipher.encrypt(b"same payload").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_layout_overhead() {
        let encrypted = encrypt(b"x", "secret").unwrap();
        // nonce + 1 byte ciphertext + tag
        assert_eq!(encrypted.len(), NONCE_LEN + 1 + TAG_LEN);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let err = decrypt(&[0u8; 8], "secret").unwrap_err();
        assert!(matches!(err, CipherError::TooShort { .. }));

        let mut encrypted = encrypt(b"payload", "secret").unwrap();
        encrypted.truncate(encrypted.len() - 1);
        assert!(matches!(
            decrypt(&encrypted, "secret").unwrap_err(),
            CipherError::Decrypt
        ));
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let encrypted = encrypt(b"", "secret").unwrap();
        let decrypted = decrypt(&encrypted, "secret").unwrap();
        assert!(decrypted.is_empty());
    }
}
