//! The login state machine.
//!
//! Outbound, [`AuthFlowController::begin_challenge`] seals the round-trip
//! state with a fresh correlation token and builds the authorization URL.
//! Inbound, [`AuthFlowController::complete_login`] decodes and checks the
//! state, then runs token exchange, openid resolution and profile fetch in
//! order, stopping at the first failure. The controller keeps no per-login
//! state; everything travels in the sealed `state` parameter.

use crate::client::QqConnectClient;
use crate::config::{AuthenticationMode, QqConnectConfig};
use crate::correlation::{CorrelationGuard, CorrelationStore};
use crate::error::{FailureReason, FlowError, FlowResult, ProviderCallError};
use crate::identity::IdentityAssembler;
use crate::state::{SealedStateCodec, StateCodec, StateKey};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{
    AuthOutcome, CallbackQuery, ChallengeRequest, RedirectInstruction, RequestContext,
    RoundTripState,
};
use async_trait::async_trait;
use futures::FutureExt;
use http::StatusCode;
use ras_identity_core::SignInSink;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Everything the host hands over for one inbound request.
pub struct HostExchange<'a> {
    pub request: &'a RequestContext,
    pub correlation: &'a dyn CorrelationStore,
    pub sign_in: &'a dyn SignInSink,
    /// Cancelled when the inbound request goes away.
    pub cancel: CancellationToken,
}

/// What the host should do with the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Not the callback path; let the next handler run.
    NotHandled,
    Redirect(RedirectInstruction),
    Error {
        status: StatusCode,
        reason: FailureReason,
    },
}

/// Callback handling as a plain capability the host router calls.
#[async_trait]
pub trait AuthenticationHandler: Send + Sync {
    async fn handle(&self, exchange: HostExchange<'_>) -> HandleOutcome;
}

/// Drives the QQ Connect login flow.
#[derive(Clone)]
pub struct AuthFlowController {
    config: Arc<QqConnectConfig>,
    codec: Arc<dyn StateCodec>,
    guard: CorrelationGuard,
    client: QqConnectClient,
    assembler: IdentityAssembler,
}

impl AuthFlowController {
    pub fn new(
        config: QqConnectConfig,
        codec: Arc<dyn StateCodec>,
        transport: Arc<dyn HttpTransport>,
    ) -> FlowResult<Self> {
        config.validate()?;

        let config = Arc::new(config);
        Ok(Self {
            guard: CorrelationGuard::new(config.correlation_cookie_name.clone()),
            client: QqConnectClient::new(transport, config.clone()),
            assembler: IdentityAssembler::new(config.save_tokens),
            codec,
            config,
        })
    }

    /// Controller with the sealed state codec and a `reqwest` transport.
    pub fn with_state_key(config: QqConnectConfig, key: &StateKey) -> FlowResult<Self> {
        let codec = Arc::new(SealedStateCodec::new(key, config.state_ttl_seconds));
        let transport = ReqwestTransport::new(config.http_timeout_seconds)
            .map_err(|e| FlowError::ConfigError(format!("HTTP client: {}", e)))?;
        Self::new(config, codec, Arc::new(transport))
    }

    pub fn config(&self) -> &QqConnectConfig {
        &self.config
    }

    /// Start a login: returns the provider URL to redirect the browser to.
    ///
    /// The correlation token is written to `store`; the host must persist it
    /// (usually as a cookie) before sending the redirect.
    pub fn begin_challenge(
        &self,
        request: ChallengeRequest,
        callback_url: &str,
        store: &dyn CorrelationStore,
    ) -> FlowResult<Url> {
        let ChallengeRequest {
            redirect_target,
            metadata,
        } = request;
        let (provider_params, extra) = ChallengeRequest::split_metadata(metadata);

        let redirect_target = redirect_target
            .filter(|target| !target.trim().is_empty())
            .unwrap_or_else(|| "/".to_string());
        let mut state = RoundTripState::new(redirect_target);
        state.extra = extra;
        let state = self.guard.issue(state, store);

        let sealed = self.codec.encode(&state)?;
        let url = self
            .client
            .build_authorization_url(&provider_params, callback_url, &sealed)?;

        info!(
            "Issued {} challenge, returning to {}",
            self.config.authentication_scheme, state.redirect_target
        );
        Ok(url)
    }

    /// Finish a login from the provider callback. Always yields an outcome.
    pub async fn complete_login(
        &self,
        query: &CallbackQuery,
        callback_url: &str,
        store: &dyn CorrelationStore,
        cancel: &CancellationToken,
    ) -> AuthOutcome {
        let attempt = AssertUnwindSafe(self.run_callback(query, callback_url, store, cancel));
        match attempt.catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Authentication failed: callback handling panicked");
                AuthOutcome::failure(FailureReason::Unexpected, None)
            }
        }
    }

    async fn run_callback(
        &self,
        query: &CallbackQuery,
        callback_url: &str,
        store: &dyn CorrelationStore,
        cancel: &CancellationToken,
    ) -> AuthOutcome {
        let state = match self.codec.decode(query.state.as_deref().unwrap_or_default()) {
            Ok(state) => state,
            Err(e) => {
                warn!("Rejected {} state: {}", self.config.authentication_scheme, e);
                return AuthOutcome::failure(FailureReason::InvalidState, None);
            }
        };
        let target = state.redirect_target.clone();

        if !self.guard.validate(&state, store) {
            return AuthOutcome::failure(FailureReason::CorrelationMismatch, Some(target));
        }

        if let Some(provider_error) = query.error.as_deref() {
            warn!(
                "Provider returned error {}: {}",
                provider_error,
                query.error_description.as_deref().unwrap_or("No description")
            );
        }

        let Some(code) = query.code.as_deref().filter(|code| !code.is_empty()) else {
            warn!("Callback carries no authorization code");
            return AuthOutcome::failure(FailureReason::MissingCode, Some(target));
        };

        let token = match self.client.exchange_code(code, callback_url, cancel).await {
            Ok(token) => token,
            Err(e) => return provider_failure(e, target),
        };

        let openid = match self.client.resolve_user_id(&token.access_token, cancel).await {
            Ok(openid) => openid,
            Err(e) => return provider_failure(e, target),
        };

        let profile = match self
            .client
            .fetch_profile(&token.access_token, &openid, cancel)
            .await
        {
            Ok(profile) => profile,
            Err(e) => return provider_failure(e, target),
        };

        let identity = match self.assembler.assemble(
            &self.config.authentication_scheme,
            &token,
            &openid,
            &profile,
        ) {
            Ok(identity) => identity,
            Err(e) => {
                error!("Authentication failed: {}", e);
                return AuthOutcome::failure(FailureReason::Unexpected, Some(target));
            }
        };

        debug!("Resolved openid {}", openid);
        info!(
            "Completed {} login, returning to {}",
            self.config.authentication_scheme, target
        );
        AuthOutcome::Success {
            identity,
            redirect_target: target,
        }
    }

    /// Turn a 401 into a challenge redirect.
    ///
    /// An empty redirect target defaults to the current request URL. In
    /// passive mode only an explicit `challenge` is acted on.
    pub fn apply_challenge_response(
        &self,
        status: StatusCode,
        challenge: Option<ChallengeRequest>,
        request: &RequestContext,
        store: &dyn CorrelationStore,
    ) -> FlowResult<Option<RedirectInstruction>> {
        if status != StatusCode::UNAUTHORIZED {
            return Ok(None);
        }

        let mut challenge = match (challenge, self.config.authentication_mode) {
            (Some(challenge), _) => challenge,
            (None, AuthenticationMode::Active) => ChallengeRequest::default(),
            (None, AuthenticationMode::Passive) => return Ok(None),
        };

        if challenge
            .redirect_target
            .as_deref()
            .is_none_or(|target| target.trim().is_empty())
        {
            challenge.redirect_target = Some(request.current_url());
        }

        let callback_url = request.callback_url(&self.config.callback_path);
        let url = self.begin_challenge(challenge, &callback_url, store)?;

        Ok(Some(RedirectInstruction {
            location: url.to_string(),
        }))
    }
}

fn provider_failure(err: ProviderCallError, target: String) -> AuthOutcome {
    if err.is_cancelled() {
        info!("Authentication abandoned: {}", err);
        return AuthOutcome::failure(FailureReason::Cancelled, Some(target));
    }

    if err.is_soft() {
        warn!("Authentication failed: {}", err);
    } else {
        error!("Authentication failed: {}", err);
    }
    AuthOutcome::failure(FailureReason::for_step(err.step()), Some(target))
}

#[async_trait]
impl AuthenticationHandler for AuthFlowController {
    async fn handle(&self, exchange: HostExchange<'_>) -> HandleOutcome {
        if exchange.request.path != self.config.callback_path {
            return HandleOutcome::NotHandled;
        }

        let callback_url = exchange.request.callback_url(&self.config.callback_path);
        let outcome = self
            .complete_login(
                &exchange.request.callback_query(),
                &callback_url,
                exchange.correlation,
                &exchange.cancel,
            )
            .await;

        match outcome {
            AuthOutcome::Success {
                identity,
                redirect_target,
            } => {
                let identity = match self.config.sign_in_scheme.as_deref() {
                    Some(scheme) if scheme != identity.scheme() => identity.with_scheme(scheme),
                    _ => identity,
                };

                if let Err(e) = exchange.sign_in.sign_in(identity, &redirect_target).await {
                    error!("Sign-in failed: {}", e);
                    return HandleOutcome::Error {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        reason: FailureReason::Unexpected,
                    };
                }

                HandleOutcome::Redirect(RedirectInstruction {
                    location: redirect_target,
                })
            }
            AuthOutcome::Failure { reason, .. } => {
                error!("Invalid return state, unable to redirect ({})", reason);
                HandleOutcome::Error {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::InMemoryCorrelationStore;
    use crate::error::TransportError;
    use crate::transport::TransportResponse;
    use std::collections::HashMap;

    struct UnreachableTransport;

    #[async_trait]
    impl HttpTransport for UnreachableTransport {
        async fn get(&self, _url: Url) -> Result<TransportResponse, TransportError> {
            panic!("no provider call expected");
        }
    }

    fn controller(config: QqConnectConfig) -> AuthFlowController {
        AuthFlowController::new(
            config,
            Arc::new(SealedStateCodec::new(&StateKey::generate(), 600)),
            Arc::new(UnreachableTransport),
        )
        .unwrap()
    }

    fn state_of(controller: &AuthFlowController, url: &Url) -> RoundTripState {
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        controller.codec.decode(&params["state"]).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = AuthFlowController::new(
            QqConnectConfig::default(),
            Arc::new(SealedStateCodec::new(&StateKey::generate(), 600)),
            Arc::new(UnreachableTransport),
        );
        assert!(matches!(result, Err(FlowError::ConfigError(_))));
    }

    #[test]
    fn test_begin_challenge_moves_provider_params_out_of_state() {
        let controller = controller(QqConnectConfig::new("101", "secret"));
        let store = InMemoryCorrelationStore::new();
        let request = ChallengeRequest::new("/orders")
            .with_provider_param("display", "mobile")
            .with_metadata("tenant", "acme");

        let url = controller
            .begin_challenge(request, "https://example.com/signin-qqconnect", &store)
            .unwrap();

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["display"], "mobile");

        let state = state_of(&controller, &url);
        assert_eq!(state.redirect_target, "/orders");
        assert_eq!(state.extra.get("tenant"), Some(&"acme".to_string()));
        assert!(!state.extra.contains_key("qqconnect.display"));
        assert_eq!(
            store.get(".Correlation.QQConnect"),
            state.correlation_token
        );
    }

    #[test]
    fn test_blank_redirect_target_falls_back_to_root() {
        let controller = controller(QqConnectConfig::new("101", "secret"));
        let store = InMemoryCorrelationStore::new();

        for target in ["", "   ", "\t"] {
            let url = controller
                .begin_challenge(
                    ChallengeRequest::new(target),
                    "https://example.com/signin-qqconnect",
                    &store,
                )
                .unwrap();
            assert_eq!(state_of(&controller, &url).redirect_target, "/");
        }
    }

    #[test]
    fn test_challenge_only_on_unauthorized() {
        let controller = controller(QqConnectConfig::new("101", "secret"));
        let store = InMemoryCorrelationStore::new();
        let request = RequestContext::new("https", "example.com", "/orders");

        let result = controller
            .apply_challenge_response(StatusCode::OK, None, &request, &store)
            .unwrap();
        assert!(result.is_none());
        assert!(store.get(".Correlation.QQConnect").is_none());
    }

    #[test]
    fn test_challenge_defaults_target_to_current_url() {
        let controller = controller(QqConnectConfig::new("101", "secret"));
        let store = InMemoryCorrelationStore::new();
        let request = RequestContext::new("https", "example.com", "/orders")
            .with_path_base("/shop")
            .with_query("page=2");

        let redirect = controller
            .apply_challenge_response(StatusCode::UNAUTHORIZED, None, &request, &store)
            .unwrap()
            .unwrap();

        let url = Url::parse(&redirect.location).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(
            params["redirect_uri"],
            "https://example.com/shop/signin-qqconnect"
        );
        assert_eq!(
            state_of(&controller, &url).redirect_target,
            "https://example.com/shop/orders?page=2"
        );
    }

    #[test]
    fn test_explicit_target_is_kept() {
        let controller = controller(QqConnectConfig::new("101", "secret"));
        let store = InMemoryCorrelationStore::new();
        let request = RequestContext::new("https", "example.com", "/orders");

        let redirect = controller
            .apply_challenge_response(
                StatusCode::UNAUTHORIZED,
                Some(ChallengeRequest::new("/welcome")),
                &request,
                &store,
            )
            .unwrap()
            .unwrap();

        let url = Url::parse(&redirect.location).unwrap();
        assert_eq!(state_of(&controller, &url).redirect_target, "/welcome");
    }

    #[test]
    fn test_passive_mode_needs_explicit_challenge() {
        let controller = controller(
            QqConnectConfig::new("101", "secret")
                .with_authentication_mode(AuthenticationMode::Passive),
        );
        let store = InMemoryCorrelationStore::new();
        let request = RequestContext::new("https", "example.com", "/orders");

        let none = controller
            .apply_challenge_response(StatusCode::UNAUTHORIZED, None, &request, &store)
            .unwrap();
        assert!(none.is_none());

        let some = controller
            .apply_challenge_response(
                StatusCode::UNAUTHORIZED,
                Some(ChallengeRequest::default()),
                &request,
                &store,
            )
            .unwrap();
        assert!(some.is_some());
    }

    #[test]
    fn test_repeated_challenges_are_independent() {
        let controller = controller(QqConnectConfig::new("101", "secret"));
        let request = RequestContext::new("https", "example.com", "/orders");
        let first_store = InMemoryCorrelationStore::new();
        let second_store = InMemoryCorrelationStore::new();

        let first = controller
            .apply_challenge_response(StatusCode::UNAUTHORIZED, None, &request, &first_store)
            .unwrap()
            .unwrap();
        let second = controller
            .apply_challenge_response(StatusCode::UNAUTHORIZED, None, &request, &second_store)
            .unwrap()
            .unwrap();

        let first_state = state_of(&controller, &Url::parse(&first.location).unwrap());
        let second_state = state_of(&controller, &Url::parse(&second.location).unwrap());
        assert_ne!(first.location, second.location);
        assert_ne!(first_state.correlation_token, second_state.correlation_token);
        assert_eq!(first_state.redirect_target, second_state.redirect_target);
    }
}
