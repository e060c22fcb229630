//! crates/attendance_core/src/token.rs
//!
//! The token codec: symmetric, authenticated encryption of `TokenPayload` JSON
//! for embedding in QR images.
//!
//! The key is derived from a shared secret with scrypt over a fixed salt, so every
//! holder of the secret derives the same key. Each encoding draws a fresh random
//! IV. AES-256-GCM authenticates the ciphertext, so any bit flipped in the IV or
//! ciphertext makes the decode fail as a whole.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;

use crate::domain::{QrToken, TokenPayload};

const KDF_SALT: &[u8] = b"attendance-qr-token";
const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const NONCE_LEN: usize = 16;

/// scrypt cost used in production (N = 2^14, r = 8, p = 1).
pub const DEFAULT_KDF_LOG_N: u8 = 14;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Malformed hex, wrong IV length, failed authentication or unparsable
    /// plaintext. Deliberately carries no detail.
    #[error("Invalid or corrupted token")]
    Decode,
    #[error("Failed to encode token: {0}")]
    Encode(String),
    #[error("Invalid key derivation parameters: {0}")]
    KeyDerivation(String),
}

/// Encrypts and decrypts token payloads with a key derived from a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    cipher: Aes256Gcm,
}

impl TokenCodec {
    /// Derives the key with the production scrypt cost.
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        Self::with_cost(secret, DEFAULT_KDF_LOG_N)
    }

    /// Derives the key with an explicit scrypt cost (`N = 2^log_n`).
    pub fn with_cost(secret: &str, log_n: u8) -> Result<Self, TokenError> {
        let params = scrypt::Params::new(log_n, 8, 1, KEY_LEN)
            .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(secret.as_bytes(), KDF_SALT, &params, &mut key)
            .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn encode(&self, payload: &TokenPayload) -> Result<QrToken, TokenError> {
        let plaintext =
            serde_json::to_vec(payload).map_err(|e| TokenError::Encode(e.to_string()))?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| TokenError::Encode("encryption failed".to_string()))?;

        Ok(QrToken {
            data: hex::encode(ciphertext),
            iv: hex::encode(iv),
        })
    }

    pub fn decode(&self, token: &QrToken) -> Result<TokenPayload, TokenError> {
        let iv = hex::decode(token.iv.trim()).map_err(|_| TokenError::Decode)?;
        if iv.len() != IV_LEN {
            return Err(TokenError::Decode);
        }
        let ciphertext = hex::decode(token.data.trim()).map_err(|_| TokenError::Decode)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| TokenError::Decode)?;

        serde_json::from_slice(&plaintext).map_err(|_| TokenError::Decode)
    }
}

/// Builds a fresh payload for issuance.
///
/// A missing session id is replaced by `session-<epoch millis>`.
pub fn issue_payload(
    student_id: Option<String>,
    session_id: Option<String>,
    now: DateTime<Utc>,
) -> TokenPayload {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let session_id = session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("session-{}", now.timestamp_millis()));

    TokenPayload {
        student_id: student_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        session_id,
        issued_at: now,
        nonce: hex::encode(nonce),
    }
}

/// Extracts the encrypted envelope from scanned QR text.
///
/// This is a format sniff only. Anything that is not a `{ data, iv }` envelope,
/// including plain-JSON claims, is refused; the payload is trusted only after
/// [`TokenCodec::decode`] succeeds.
pub fn parse_envelope(scanned: &str) -> Result<QrToken, TokenError> {
    #[derive(Deserialize)]
    struct Envelope {
        data: Option<String>,
        iv: Option<String>,
    }

    let envelope: Envelope =
        serde_json::from_str(scanned.trim()).map_err(|_| TokenError::Decode)?;
    match (envelope.data, envelope.iv) {
        (Some(data), Some(iv)) if !data.is_empty() && !iv.is_empty() => Ok(QrToken { data, iv }),
        _ => Err(TokenError::Decode),
    }
}
