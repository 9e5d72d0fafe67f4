//! QQ Connect error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

/// Failures on the challenge side of the flow and in configuration.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("State encoding failed: {0}")]
    StateEncoding(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Why a sealed state token was rejected. Decoding never yields partial state.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("State parameter is missing")]
    Missing,

    #[error("State is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("State is too short")]
    Truncated,

    #[error("State failed authentication")]
    Unauthenticated,

    #[error("State payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("State expired")]
    Expired,
}

/// Errors raised by the HTTP transport collaborator.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Transport failure: {0}")]
    Other(String),
}

/// The provider call a [`ProviderCallError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStep {
    TokenExchange,
    OpenIdResolution,
    ProfileFetch,
}

impl fmt::Display for ProviderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStep::TokenExchange => write!(f, "token exchange"),
            ProviderStep::OpenIdResolution => write!(f, "openid resolution"),
            ProviderStep::ProfileFetch => write!(f, "profile fetch"),
        }
    }
}

/// Failure of one provider call.
///
/// Messages never carry response bodies or tokens.
#[derive(Debug, Error)]
pub enum ProviderCallError {
    #[error("{step} failed: {source}")]
    Transport {
        step: ProviderStep,
        #[source]
        source: TransportError,
    },

    #[error("{step} failed: provider answered HTTP {status}")]
    Status { step: ProviderStep, status: u16 },

    #[error("{step} failed: provider error {code} ({description})")]
    Provider {
        step: ProviderStep,
        code: String,
        description: String,
    },

    #[error("{step} failed: {field} was not found")]
    MissingField {
        step: ProviderStep,
        field: &'static str,
    },

    #[error("{step} failed: unreadable response: {reason}")]
    InvalidResponse { step: ProviderStep, reason: String },

    #[error("{step} cancelled")]
    Cancelled { step: ProviderStep },
}

pub type ExchangeError = ProviderCallError;
pub type ResolveError = ProviderCallError;
pub type ProfileError = ProviderCallError;

impl ProviderCallError {
    pub fn step(&self) -> ProviderStep {
        match self {
            ProviderCallError::Transport { step, .. }
            | ProviderCallError::Status { step, .. }
            | ProviderCallError::Provider { step, .. }
            | ProviderCallError::MissingField { step, .. }
            | ProviderCallError::InvalidResponse { step, .. }
            | ProviderCallError::Cancelled { step } => *step,
        }
    }

    /// Application-level failure inside an otherwise delivered response.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ProviderCallError::Provider { .. } | ProviderCallError::MissingField { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderCallError::Cancelled { .. })
    }
}

/// Opaque failure category surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    InvalidState,
    CorrelationMismatch,
    MissingCode,
    TokenExchangeFailed,
    IdResolutionFailed,
    ProfileFetchFailed,
    Cancelled,
    Unexpected,
}

impl FailureReason {
    pub fn for_step(step: ProviderStep) -> Self {
        match step {
            ProviderStep::TokenExchange => FailureReason::TokenExchangeFailed,
            ProviderStep::OpenIdResolution => FailureReason::IdResolutionFailed,
            ProviderStep::ProfileFetch => FailureReason::ProfileFetchFailed,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::InvalidState => "invalid state",
            FailureReason::CorrelationMismatch => "correlation failed",
            FailureReason::MissingCode => "missing authorization code",
            FailureReason::TokenExchangeFailed => "token exchange failed",
            FailureReason::IdResolutionFailed => "openid resolution failed",
            FailureReason::ProfileFetchFailed => "profile fetch failed",
            FailureReason::Cancelled => "request cancelled",
            FailureReason::Unexpected => "authentication failed",
        };
        f.write_str(text)
    }
}
