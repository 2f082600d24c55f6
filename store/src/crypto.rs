use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use celine_core::error::TriageError;

const NONCE_LEN: usize = 12;

/// Authenticated at-rest encryption for every stored session, transcript,
/// audit, and ticket payload. Keyed by a process-wide secret provided at
/// startup; a storage-layer breach alone does not disclose clinical content.
#[derive(Clone)]
pub struct Envelope {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Envelope(..)")
    }
}

impl Envelope {
    /// Build an envelope from key material: either a base64-encoded 32-byte
    /// key, or an arbitrary passphrase that is stretched through SHA-256.
    /// An empty secret is refused — the process must fail fast at startup.
    pub fn from_key_material(material: &str) -> Result<Self, TriageError> {
        if material.trim().is_empty() {
            return Err(TriageError::Storage(
                "encryption key material is empty".to_string(),
            ));
        }

        let key_bytes: [u8; 32] = match B64.decode(material.trim()) {
            Ok(decoded) if decoded.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&decoded);
                key
            }
            _ => Sha256::digest(material.trim().as_bytes()).into(),
        };

        Ok(Envelope {
            cipher: Aes256Gcm::new((&key_bytes).into()),
        })
    }

    /// Encrypt and authenticate a payload. The sealed record is
    /// base64(nonce ‖ ciphertext) with a fresh random 96-bit nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, TriageError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| TriageError::Storage("payload encryption failed".to_string()))?;

        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        record.extend_from_slice(&nonce_bytes);
        record.extend_from_slice(&ciphertext);
        Ok(B64.encode(record))
    }

    /// Decrypt a sealed record. Wrong key, corrupted ciphertext, or any
    /// bit-flip fails authentication — a hard error, never corrupted
    /// plaintext.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, TriageError> {
        let record = B64
            .decode(sealed)
            .map_err(|_| TriageError::Storage("sealed record is not valid base64".to_string()))?;
        if record.len() <= NONCE_LEN {
            return Err(TriageError::Storage(
                "sealed record is too short to contain a nonce".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = record.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                TriageError::Storage(
                    "payload authentication failed (wrong key or tampered ciphertext)".to_string(),
                )
            })
    }

    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<String, TriageError> {
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| TriageError::Storage(format!("payload serialization failed: {e}")))?;
        self.seal(&plaintext)
    }

    pub fn open_json<T: DeserializeOwned>(&self, sealed: &str) -> Result<T, TriageError> {
        let plaintext = self.open(sealed)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| TriageError::Storage(format!("payload deserialization failed: {e}")))
    }

    pub fn seal_text(&self, text: &str) -> Result<String, TriageError> {
        self.seal(text.as_bytes())
    }

    pub fn open_text(&self, sealed: &str) -> Result<String, TriageError> {
        let plaintext = self.open(sealed)?;
        String::from_utf8(plaintext)
            .map_err(|_| TriageError::Storage("decrypted payload is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::from_key_material("test-passphrase").unwrap()
    }

    #[test]
    fn seal_open_round_trips() {
        let env = envelope();
        let sealed = env.seal(b"chief complaint: mild cough").unwrap();
        assert_eq!(env.open(&sealed).unwrap(), b"chief complaint: mild cough");
    }

    #[test]
    fn distinct_nonces_give_distinct_records() {
        let env = envelope();
        let a = env.seal(b"same plaintext").unwrap();
        let b = env.seal(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn any_bit_flip_fails_authentication() {
        let env = envelope();
        let sealed = env.seal(b"sensitive").unwrap();
        let mut raw = B64.decode(&sealed).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = B64.encode(&raw);
            assert!(env.open(&tampered).is_err(), "flip at byte {i} must fail");
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = envelope().seal(b"sensitive").unwrap();
        let other = Envelope::from_key_material("another-passphrase").unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn empty_key_material_is_refused() {
        assert!(Envelope::from_key_material("   ").is_err());
    }

    #[test]
    fn base64_key_and_passphrase_paths_both_work() {
        let raw_key = [7u8; 32];
        let env = Envelope::from_key_material(&B64.encode(raw_key)).unwrap();
        let sealed = env.seal(b"payload").unwrap();
        assert_eq!(env.open(&sealed).unwrap(), b"payload");
    }
}
