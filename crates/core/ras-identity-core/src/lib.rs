//! Core identity types shared by the login flows.
//!
//! A flow produces a [`NormalizedIdentity`] and hands it to a [`SignInSink`],
//! which is whatever the host uses to establish its session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity subject must not be empty")]
    EmptySubject,

    #[error("Claim type must not be empty")]
    EmptyClaimType,

    #[error("Sign-in failed: {0}")]
    SignInFailed(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// Well-known claim types.
pub mod claim_types {
    pub const SUBJECT: &str = "sub";
    pub const NAME: &str = "name";
}

/// A typed attribute describing the authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Identity record handed to the host once a login flow succeeds.
///
/// Claims keep their insertion order. The subject is always present as the
/// first `sub` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    scheme: String,
    subject: String,
    claims: Vec<Claim>,
}

impl NormalizedIdentity {
    pub fn new(scheme: impl Into<String>, subject: impl Into<String>) -> IdentityResult<Self> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(IdentityError::EmptySubject);
        }

        Ok(Self {
            scheme: scheme.into(),
            claims: vec![Claim::new(claim_types::SUBJECT, subject.clone())],
            subject,
        })
    }

    /// Authentication scheme label chosen by the host.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Append a claim. Blank values are skipped.
    pub fn add_claim(
        &mut self,
        claim_type: impl Into<String>,
        value: impl Into<String>,
    ) -> IdentityResult<()> {
        let claim_type = claim_type.into();
        if claim_type.is_empty() {
            return Err(IdentityError::EmptyClaimType);
        }

        let value = value.into();
        if !value.trim().is_empty() {
            self.claims.push(Claim::new(claim_type, value));
        }
        Ok(())
    }

    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|claim| claim.claim_type == claim_type)
            .map(|claim| claim.value.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.find_first(claim_types::NAME)
    }

    /// Relabel the identity with another scheme, keeping its claims.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

/// Establishes the host's session for a finished identity.
///
/// A login flow calls this exactly once, and only when it succeeded.
#[async_trait]
pub trait SignInSink: Send + Sync {
    async fn sign_in(
        &self,
        identity: NormalizedIdentity,
        redirect_target: &str,
    ) -> IdentityResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_subject_is_first_claim() {
        let identity = NormalizedIdentity::new("QQConnect", "U1").unwrap();
        assert_eq!(identity.subject(), "U1");
        assert_eq!(identity.claims()[0], Claim::new("sub", "U1"));
    }

    #[test]
    fn test_blank_subject_rejected() {
        assert!(matches!(
            NormalizedIdentity::new("QQConnect", "  "),
            Err(IdentityError::EmptySubject)
        ));
    }

    #[test]
    fn test_claims_keep_order_and_skip_blank_values() {
        let mut identity = NormalizedIdentity::new("QQConnect", "U1").unwrap();
        identity.add_claim("name", "Alice").unwrap();
        identity.add_claim("urn:test:empty", "").unwrap();
        identity.add_claim("urn:test:color", "blue").unwrap();

        let types: Vec<_> = identity
            .claims()
            .iter()
            .map(|c| c.claim_type.as_str())
            .collect();
        assert_eq!(types, vec!["sub", "name", "urn:test:color"]);
        assert_eq!(identity.name(), Some("Alice"));
        assert!(identity.add_claim("", "x").is_err());
    }

    #[test]
    fn test_with_scheme_keeps_claims() {
        let mut identity = NormalizedIdentity::new("QQConnect", "U1").unwrap();
        identity.add_claim("name", "Alice").unwrap();

        let relabelled = identity.clone().with_scheme("Cookies");
        assert_eq!(relabelled.scheme(), "Cookies");
        assert_eq!(relabelled.claims(), identity.claims());
    }

    struct CapturingSink(Mutex<Vec<(NormalizedIdentity, String)>>);

    #[async_trait]
    impl SignInSink for CapturingSink {
        async fn sign_in(
            &self,
            identity: NormalizedIdentity,
            redirect_target: &str,
        ) -> IdentityResult<()> {
            self.0
                .lock()
                .unwrap()
                .push((identity, redirect_target.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_receives_identity() {
        let sink = CapturingSink(Mutex::new(Vec::new()));
        let identity = NormalizedIdentity::new("QQConnect", "U1").unwrap();

        sink.sign_in(identity.clone(), "/home").await.unwrap();

        let calls = sink.0.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (identity, "/home".to_string()));
    }

    #[test]
    fn test_identity_serializes_claim_type_field() {
        let identity = NormalizedIdentity::new("QQConnect", "U1").unwrap();
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["claims"][0]["type"], "sub");
        assert_eq!(json["scheme"], "QQConnect");
    }
}
