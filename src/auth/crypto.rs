//! Credential encryption at rest
//!
//! AES-256-GCM with a per-service key derived from a master key through
//! HKDF-SHA256. Payloads are stored as base64(nonce || ciphertext || tag).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

/// Length of AES-256 key in bytes.
const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

/// Context string for HKDF key derivation.
const HKDF_INFO: &[u8] = b"integration-hub-credentials-v1";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Encrypts and decrypts serialized credentials
#[derive(Clone)]
pub struct CredentialCipher {
    master_key: [u8; KEY_LENGTH],
}

impl CredentialCipher {
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    /// Random key from the OS CSPRNG.
    ///
    /// Anything encrypted with it is unreadable after the process exits, so
    /// this suits in-memory backends and tests.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Create from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKey(format!("invalid base64: {e}")))?;

        let key: [u8; KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            CipherError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// Read a base64 key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, CipherError> {
        let encoded = std::env::var(var)
            .map_err(|_| CipherError::InvalidKey(format!("environment variable {var} is not set")))?;
        Self::from_base64(&encoded)
    }

    fn derive_key(&self, service_name: &str) -> Result<[u8; KEY_LENGTH], CipherError> {
        let hkdf = Hkdf::<Sha256>::new(Some(service_name.as_bytes()), &self.master_key);
        let mut derived = [0u8; KEY_LENGTH];
        hkdf.expand(HKDF_INFO, &mut derived)
            .map_err(|e| CipherError::InvalidKey(format!("key derivation failed: {e}")))?;
        Ok(derived)
    }

    /// Encrypt `plaintext` for `service_name`, returning the base64 payload.
    pub fn encrypt(&self, service_name: &str, plaintext: &[u8]) -> Result<String, CipherError> {
        let key = self.derive_key(service_name)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CipherError::Encrypt(format!("failed to create cipher: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(payload))
    }

    /// Decrypt a payload produced by [`encrypt`](Self::encrypt) for the same service.
    pub fn decrypt(&self, service_name: &str, payload: &str) -> Result<Vec<u8>, CipherError> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| CipherError::Decrypt(format!("invalid base64: {e}")))?;

        if bytes.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CipherError::Decrypt("ciphertext too short".to_string()));
        }

        let key = self.derive_key(service_name)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CipherError::Decrypt(format!("failed to create cipher: {e}")))?;

        let (nonce_bytes, encrypted) = bytes.split_at(NONCE_LENGTH);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|e| CipherError::Decrypt(e.to_string()))
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("master_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = CredentialCipher::generate();
        let payload = cipher.encrypt("files", br#"{"kind":"api_key"}"#).unwrap();
        assert!(!payload.contains("api_key"));
        assert_eq!(
            cipher.decrypt("files", &payload).unwrap(),
            br#"{"kind":"api_key"}"#
        );
    }

    #[test]
    fn test_nonce_is_random() {
        let cipher = CredentialCipher::generate();
        let a = cipher.encrypt("files", b"same").unwrap();
        let b = cipher.encrypt("files", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_bound_to_service() {
        let cipher = CredentialCipher::generate();
        let payload = cipher.encrypt("files", b"secret").unwrap();
        assert!(cipher.decrypt("calendar", &payload).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let cipher = CredentialCipher::generate();
        let payload = cipher.encrypt("files", b"secret").unwrap();
        let mut bytes = STANDARD.decode(&payload).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(cipher.decrypt("files", &STANDARD.encode(bytes)).is_err());
        assert!(cipher.decrypt("files", "AAAA").is_err());
    }

    #[test]
    fn test_from_base64() {
        let key = STANDARD.encode([7u8; 32]);
        let a = CredentialCipher::from_base64(&key).unwrap();
        let b = CredentialCipher::from_base64(&key).unwrap();
        let payload = a.encrypt("svc", b"hello").unwrap();
        assert_eq!(b.decrypt("svc", &payload).unwrap(), b"hello");

        assert!(CredentialCipher::from_base64(&STANDARD.encode([1u8; 16])).is_err());
        assert!(CredentialCipher::from_base64("not base64!").is_err());
    }
}
