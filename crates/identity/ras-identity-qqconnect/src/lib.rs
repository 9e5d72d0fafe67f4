//! QQ Connect login for the server side of the OAuth2 authorization code flow.
//!
//! [`AuthFlowController`] issues the challenge redirect and completes the
//! callback: the round-trip state is sealed with AES-256-GCM and bound to the
//! browser through a correlation token, then the code is exchanged, the
//! openid resolved and the profile fetched before a [`NormalizedIdentity`]
//! is handed to the host's sign-in sink.

mod client;
mod config;
mod correlation;
mod error;
mod flow;
mod identity;
mod state;
mod transport;
mod types;


pub use client::QqConnectClient;
pub use config::{
    AuthenticationMode, DEFAULT_AUTHORIZATION_ENDPOINT, DEFAULT_OPENID_ENDPOINT,
    DEFAULT_TOKEN_ENDPOINT, DEFAULT_USER_INFO_ENDPOINT, QqConnectConfig,
};
pub use correlation::{CorrelationGuard, CorrelationStore, InMemoryCorrelationStore};
pub use error::{
    DecodeError, ExchangeError, FailureReason, FlowError, FlowResult, ProfileError,
    ProviderCallError, ProviderStep, ResolveError, TransportError,
};
pub use flow::{AuthFlowController, AuthenticationHandler, HandleOutcome, HostExchange};
pub use identity::{IdentityAssembler, qq_claim_types};
pub use state::{SealedStateCodec, StateCodec, StateKey};
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse};
pub use types::{
    AuthOutcome, CallbackQuery, ChallengeRequest, PROVIDER_PARAM_PREFIX, ProviderProfile,
    ProviderToken, ProviderUserId, RedirectInstruction, RequestContext, RoundTripState,
};

// Re-export common types for convenience
pub use ras_identity_core::{Claim, NormalizedIdentity, SignInSink};
pub use tokio_util::sync::CancellationToken;
