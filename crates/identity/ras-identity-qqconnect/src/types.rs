//! QQ Connect protocol and flow types.

use crate::error::FailureReason;
use ras_identity_core::NormalizedIdentity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Metadata keys with this prefix become authorization URL parameters
/// instead of travelling in the round-trip state.
pub const PROVIDER_PARAM_PREFIX: &str = "qqconnect.";

/// Host request to start a login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeRequest {
    /// Where to send the browser after a successful login.
    pub redirect_target: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ChallengeRequest {
    pub fn new(redirect_target: impl Into<String>) -> Self {
        Self {
            redirect_target: Some(redirect_target.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Extra authorization URL parameter, e.g. `display=mobile`.
    pub fn with_provider_param(self, name: &str, value: impl Into<String>) -> Self {
        self.with_metadata(format!("{}{}", PROVIDER_PARAM_PREFIX, name), value)
    }

    /// Split the metadata into (provider parameters, round-trip extras).
    pub(crate) fn split_metadata(
        metadata: BTreeMap<String, String>,
    ) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut provider_params = BTreeMap::new();
        let mut extra = BTreeMap::new();
        for (key, value) in metadata {
            match key.strip_prefix(PROVIDER_PARAM_PREFIX) {
                Some(name) if !name.is_empty() => {
                    provider_params.insert(name.to_string(), value);
                }
                _ => {
                    extra.insert(key, value);
                }
            }
        }
        (provider_params, extra)
    }
}

/// Everything the flow needs back from the provider redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTripState {
    pub redirect_target: String,
    pub correlation_token: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl RoundTripState {
    pub fn new(redirect_target: impl Into<String>) -> Self {
        Self {
            redirect_target: redirect_target.into(),
            correlation_token: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Access token returned by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderToken {
    pub access_token: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    /// Every field of the response, as received.
    pub raw: BTreeMap<String, String>,
}

impl fmt::Debug for ProviderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Stable QQ user identifier (the `openid`). Never blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderUserId(String);

impl ProviderUserId {
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response of `get_user_info`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    #[serde(default)]
    pub ret: i64,
    #[serde(default)]
    pub msg: String,
    pub nickname: Option<String>,
    pub gender: Option<String>,
    pub figureurl: Option<String>,
    pub figureurl_1: Option<String>,
    pub figureurl_2: Option<String>,
    pub figureurl_qq_1: Option<String>,
    pub figureurl_qq_2: Option<String>,
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl ProviderProfile {
    /// Avatar URLs that are present, keyed by their QQ field name.
    pub fn figure_urls(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("figureurl", &self.figureurl),
            ("figureurl_1", &self.figureurl_1),
            ("figureurl_2", &self.figureurl_2),
            ("figureurl_qq_1", &self.figureurl_qq_1),
            ("figureurl_qq_2", &self.figureurl_qq_2),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
    }
}

/// Query string of the provider callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackQuery {
    pub fn parse(query: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                "code" => &mut parsed.code,
                "state" => &mut parsed.state,
                "error" => &mut parsed.error,
                "error_description" => &mut parsed.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        parsed
    }
}

/// Terminal result of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success {
        identity: NormalizedIdentity,
        redirect_target: String,
    },
    Failure {
        reason: FailureReason,
        /// Present once the state decoded, so the host can render a safe page.
        redirect_target: Option<String>,
    },
}

impl AuthOutcome {
    pub(crate) fn failure(reason: FailureReason, redirect_target: Option<String>) -> Self {
        AuthOutcome::Failure {
            reason,
            redirect_target,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success { .. })
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            AuthOutcome::Success { .. } => None,
            AuthOutcome::Failure { reason, .. } => Some(*reason),
        }
    }
}

/// Redirect the host should send to the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInstruction {
    pub location: String,
}

/// The parts of the inbound request the flow looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub scheme: String,
    pub host: String,
    /// Mount point of the application, empty or starting with `/`.
    pub path_base: String,
    pub path: String,
    pub query: Option<String>,
}

impl RequestContext {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path_base: String::new(),
            path: path.into(),
            query: None,
        }
    }

    pub fn with_path_base(mut self, path_base: impl Into<String>) -> Self {
        self.path_base = path_base.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Absolute URL of this request.
    pub fn current_url(&self) -> String {
        let mut url = format!(
            "{}://{}{}{}",
            self.scheme, self.host, self.path_base, self.path
        );
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Redirect URI registered with the provider for this host.
    pub fn callback_url(&self, callback_path: &str) -> String {
        format!(
            "{}://{}{}{}",
            self.scheme, self.host, self.path_base, callback_path
        )
    }

    pub fn callback_query(&self) -> CallbackQuery {
        self.query
            .as_deref()
            .map(CallbackQuery::parse)
            .unwrap_or_default()
    }
}
