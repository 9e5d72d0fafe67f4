//! Correlation tokens for CSRF protection of the callback.
//!
//! The token is written both into the sealed state and into a per-browser
//! store (normally a short-lived cookie). A callback is only accepted when
//! the two match, and the stored value is consumed on every check.

use crate::types::RoundTripState;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Mutex;
use subtle::ConstantTimeEq;
use tracing::warn;

const TOKEN_BYTES: usize = 32;

/// Named values bound to one browser session, managed by the host.
pub trait CorrelationStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: String);

    fn remove(&self, name: &str);
}

/// In-memory [`CorrelationStore`]. Use one instance per browser session.
#[derive(Default)]
pub struct InMemoryCorrelationStore {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorrelationStore for InMemoryCorrelationStore {
    fn get(&self, name: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    fn set(&self, name: &str, value: String) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value);
    }

    fn remove(&self, name: &str) {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
    }
}

/// Issues and checks correlation tokens under one store key.
#[derive(Debug, Clone)]
pub struct CorrelationGuard {
    name: String,
}

impl CorrelationGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 256 random bits from the OS, base64url encoded.
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Attach a fresh token to `state` and remember it in `store`.
    pub fn issue(&self, mut state: RoundTripState, store: &dyn CorrelationStore) -> RoundTripState {
        let token = Self::generate_token();
        store.set(&self.name, token.clone());
        state.correlation_token = Some(token);
        state
    }

    /// Compare the token in `state` with the stored one. Consumes the stored
    /// value whatever the result.
    pub fn validate(&self, state: &RoundTripState, store: &dyn CorrelationStore) -> bool {
        let stored = store.get(&self.name);
        store.remove(&self.name);

        let Some(stored) = stored else {
            warn!("Correlation value {} not found", self.name);
            return false;
        };
        let Some(expected) = state.correlation_token.as_deref() else {
            warn!("State carries no correlation token");
            return false;
        };

        let matches: bool = stored.as_bytes().ct_eq(expected.as_bytes()).into();
        if !matches {
            warn!("Correlation token mismatch for {}", self.name);
        }
        matches
    }
}
