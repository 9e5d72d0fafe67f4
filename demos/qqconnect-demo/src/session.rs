//! Cookie-backed correlation storage and a JWT session sink for the demo host.

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use ras_identity_core::{Claim, IdentityError, IdentityResult, NormalizedIdentity, SignInSink};
use ras_identity_qqconnect::CorrelationStore;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

pub const SESSION_COOKIE: &str = "qq_session";

/// Correlation values kept as cookies on the response.
///
/// The jar comes from the request; whatever the flow writes or removes is
/// sent back with [`CookieCorrelationStore::into_jar`].
pub struct CookieCorrelationStore {
    jar: Mutex<CookieJar>,
    secure: bool,
}

impl CookieCorrelationStore {
    pub fn new(jar: CookieJar, secure: bool) -> Self {
        Self {
            jar: Mutex::new(jar),
            secure,
        }
    }

    pub fn into_jar(self) -> CookieJar {
        self.jar.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl CorrelationStore for CookieCorrelationStore {
    fn get(&self, name: &str) -> Option<String> {
        let jar = self.jar.lock().unwrap_or_else(|e| e.into_inner());
        jar.get(name).map(|cookie| cookie.value().to_string())
    }

    fn set(&self, name: &str, value: String) {
        let cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax);

        let mut jar = self.jar.lock().unwrap_or_else(|e| e.into_inner());
        *jar = jar.clone().add(cookie);
    }

    fn remove(&self, name: &str) {
        let mut jar = self.jar.lock().unwrap_or_else(|e| e.into_inner());
        *jar = jar
            .clone()
            .remove(Cookie::build((name.to_string(), "")).path("/"));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub scheme: String,
    pub claims: Vec<Claim>,
    pub iat: i64,
    pub exp: i64,
}

/// Signs the user in by minting an HS256 session token.
pub struct JwtSessionSink {
    secret: String,
    ttl: chrono::Duration,
    issued: Mutex<Option<String>>,
}

impl JwtSessionSink {
    pub fn new(secret: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
            issued: Mutex::new(None),
        }
    }

    /// The token minted by the last sign-in, if any.
    pub fn take_token(&self) -> Option<String> {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .build()
    }
}

#[async_trait]
impl SignInSink for JwtSessionSink {
    async fn sign_in(
        &self,
        identity: NormalizedIdentity,
        redirect_target: &str,
    ) -> IdentityResult<()> {
        let now = chrono::Utc::now();
        let claims = SessionClaims {
            sub: identity.subject().to_string(),
            scheme: identity.scheme().to_string(),
            claims: identity.claims().to_vec(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| IdentityError::SignInFailed(format!("Failed to encode session: {}", e)))?;

        info!(
            "Signed in {} via {}, continuing to {}",
            claims.sub, claims.scheme, redirect_target
        );
        *self.issued.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        Ok(())
    }
}

/// Validate a session token minted by [`JwtSessionSink`].
pub fn verify_session(token: &str, secret: &str) -> Option<SessionClaims> {
    match decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            debug!("Rejected session token: {}", e);
            None
        }
    }
}
