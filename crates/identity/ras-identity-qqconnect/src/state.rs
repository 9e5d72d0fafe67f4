//! Sealed round-trip state carried in the `state` query parameter.
//!
//! Nothing is stored server-side: the state is serialized, encrypted and
//! authenticated with AES-256-GCM, and travels through the provider as
//! `base64url(nonce || ciphertext)`.

use crate::error::{DecodeError, FlowError, FlowResult};
use crate::types::RoundTripState;
use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Opaque encode/decode of the round-trip state.
pub trait StateCodec: Send + Sync {
    fn encode(&self, state: &RoundTripState) -> FlowResult<String>;

    fn decode(&self, token: &str) -> Result<RoundTripState, DecodeError>;
}

/// 256-bit key for [`SealedStateCodec`].
#[derive(Clone)]
pub struct StateKey([u8; 32]);

impl StateKey {
    /// Random key. States sealed with it do not survive a restart.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a 64 character hex key.
    pub fn from_hex(key_hex: &str) -> FlowResult<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| FlowError::ConfigError(format!("state key is not hex: {}", e)))?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            FlowError::ConfigError("state key must be 32 bytes (64 hex characters)".to_string())
        })?;
        Ok(Self(key))
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateKey(<redacted>)")
    }
}

#[derive(Serialize, Deserialize)]
struct SealedEnvelope {
    state: RoundTripState,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// AES-256-GCM [`StateCodec`] with a bounded lifetime.
pub struct SealedStateCodec {
    cipher: Aes256Gcm,
    ttl: Duration,
}

impl SealedStateCodec {
    pub fn new(key: &StateKey, ttl_seconds: u64) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
            ttl: Duration::seconds(ttl_seconds.min(i32::MAX as u64) as i64),
        }
    }

    fn seal(&self, state: &RoundTripState, issued_at: DateTime<Utc>) -> FlowResult<String> {
        let envelope = SealedEnvelope {
            state: state.clone(),
            issued_at,
            expires_at: issued_at + self.ttl,
        };
        let payload = serde_json::to_vec(&envelope)?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|_| FlowError::StateEncoding("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }
}

impl StateCodec for SealedStateCodec {
    fn encode(&self, state: &RoundTripState) -> FlowResult<String> {
        self.seal(state, Utc::now())
    }

    fn decode(&self, token: &str) -> Result<RoundTripState, DecodeError> {
        if token.is_empty() {
            return Err(DecodeError::Missing);
        }

        let raw = URL_SAFE_NO_PAD.decode(token)?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(DecodeError::Truncated);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecodeError::Unauthenticated)?;

        let envelope: SealedEnvelope = serde_json::from_slice(&plaintext)?;
        if Utc::now() > envelope.expires_at {
            return Err(DecodeError::Expired);
        }

        Ok(envelope.state)
    }
}
