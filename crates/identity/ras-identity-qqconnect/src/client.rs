//! QQ Connect provider calls.
//!
//! Three independent calls, each with its own failure domain:
//! code -> access token, access token -> openid, (token, openid) -> profile.
//! Every call races the caller's cancellation token and never retries.

use crate::config::QqConnectConfig;
use crate::error::{
    ExchangeError, FlowResult, ProfileError, ProviderCallError, ProviderStep, ResolveError,
};
use crate::transport::HttpTransport;
use crate::types::{ProviderProfile, ProviderToken, ProviderUserId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

/// Stateless wrapper around the QQ Connect endpoints.
#[derive(Clone)]
pub struct QqConnectClient {
    transport: Arc<dyn HttpTransport>,
    config: Arc<QqConnectConfig>,
}

impl QqConnectClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: Arc<QqConnectConfig>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &QqConnectConfig {
        &self.config
    }

    /// Build the authorization endpoint URL. No I/O.
    pub fn build_authorization_url(
        &self,
        provider_params: &BTreeMap<String, String>,
        redirect_uri: &str,
        state: &str,
    ) -> FlowResult<Url> {
        let mut url = Url::parse(&self.config.authorization_endpoint)?;

        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &self.config.client_id);
        params.append_pair("redirect_uri", redirect_uri);
        params.append_pair("state", state);

        if !self.config.scopes.is_empty() {
            params.append_pair("scope", &self.config.scope_param());
        }

        for (key, value) in provider_params {
            params.append_pair(key, value);
        }

        drop(params);

        debug!("Generated QQ Connect authorization URL");
        Ok(url)
    }

    /// Exchange the authorization code for an access token.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderToken, ExchangeError> {
        let step = ProviderStep::TokenExchange;
        let mut url = endpoint(step, &self.config.token_endpoint)?;
        url.query_pairs_mut()
            .append_pair("grant_type", "authorization_code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("client_secret", &self.config.client_secret)
            .append_pair("code", code)
            .append_pair("redirect_uri", redirect_uri);

        let body = self.send(step, url, cancel).await?;
        parse_token_response(&body)
    }

    /// Resolve the access token to the user's openid.
    pub async fn resolve_user_id(
        &self,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderUserId, ResolveError> {
        let step = ProviderStep::OpenIdResolution;
        let mut url = endpoint(step, &self.config.openid_endpoint)?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token);

        let body = self.send(step, url, cancel).await?;
        parse_openid_response(&body)
    }

    /// Fetch the user's profile.
    pub async fn fetch_profile(
        &self,
        access_token: &str,
        openid: &ProviderUserId,
        cancel: &CancellationToken,
    ) -> Result<ProviderProfile, ProfileError> {
        let step = ProviderStep::ProfileFetch;
        let mut url = endpoint(step, &self.config.user_info_endpoint)?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token)
            .append_pair("oauth_consumer_key", &self.config.client_id)
            .append_pair("openid", openid.as_str());

        let body = self.send(step, url, cancel).await?;
        parse_profile_response(&body)
    }

    async fn send(
        &self,
        step: ProviderStep,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderCallError> {
        // Query strings carry secrets, only the path is logged.
        debug!("QQ Connect {} request to {}", step, url.path());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderCallError::Cancelled { step }),
            result = self.transport.get(url) => {
                result.map_err(|source| ProviderCallError::Transport { step, source })?
            }
        };

        if !response.is_success() {
            error!("QQ Connect {} answered HTTP {}", step, response.status);
            return Err(ProviderCallError::Status {
                step,
                status: response.status,
            });
        }

        Ok(response.body)
    }
}

fn endpoint(step: ProviderStep, raw: &str) -> Result<Url, ProviderCallError> {
    Url::parse(raw).map_err(|e| ProviderCallError::InvalidResponse {
        step,
        reason: format!("invalid endpoint: {}", e),
    })
}

/// Unwrap `callback( {...} );` bodies. Plain bodies are returned trimmed.
fn strip_jsonp(body: &str) -> &str {
    let trimmed = body.trim();
    if let Some(rest) = trimmed.strip_prefix("callback") {
        if let (Some(open), Some(close)) = (rest.find('('), rest.rfind(')')) {
            if open < close {
                return rest[open + 1..close].trim();
            }
        }
    }
    trimmed
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_json_object(
    step: ProviderStep,
    body: &str,
) -> Result<serde_json::Map<String, Value>, ProviderCallError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProviderCallError::InvalidResponse {
            step,
            reason: "expected a JSON object".to_string(),
        }),
        Err(e) => Err(ProviderCallError::InvalidResponse {
            step,
            reason: e.to_string(),
        }),
    }
}

/// `{"error": .., "error_description": ..}` payloads, delivered with HTTP 200.
fn provider_error(
    step: ProviderStep,
    fields: &BTreeMap<String, String>,
) -> Option<ProviderCallError> {
    fields.get("error").map(|code| ProviderCallError::Provider {
        step,
        code: code.clone(),
        description: fields
            .get("error_description")
            .cloned()
            .unwrap_or_default(),
    })
}

fn response_fields(
    step: ProviderStep,
    body: &str,
) -> Result<BTreeMap<String, String>, ProviderCallError> {
    let payload = strip_jsonp(body);
    if payload.starts_with('{') {
        let object = parse_json_object(step, payload)?;
        Ok(object
            .iter()
            .map(|(key, value)| (key.clone(), value_to_string(value)))
            .collect())
    } else {
        Ok(url::form_urlencoded::parse(payload.as_bytes())
            .into_owned()
            .collect())
    }
}

fn parse_token_response(body: &str) -> Result<ProviderToken, ExchangeError> {
    let step = ProviderStep::TokenExchange;
    let raw = response_fields(step, body)?;
    if let Some(err) = provider_error(step, &raw) {
        return Err(err);
    }

    let access_token = raw
        .get("access_token")
        .filter(|token| !token.trim().is_empty())
        .cloned()
        .ok_or(ProviderCallError::MissingField {
            step,
            field: "access_token",
        })?;

    Ok(ProviderToken {
        access_token,
        expires_in: raw.get("expires_in").and_then(|v| v.parse().ok()),
        refresh_token: raw
            .get("refresh_token")
            .filter(|token| !token.is_empty())
            .cloned(),
        raw,
    })
}

fn parse_openid_response(body: &str) -> Result<ProviderUserId, ResolveError> {
    let step = ProviderStep::OpenIdResolution;
    let fields = response_fields(step, body)?;
    if let Some(err) = provider_error(step, &fields) {
        return Err(err);
    }

    fields
        .get("openid")
        .and_then(|openid| ProviderUserId::new(openid.clone()))
        .ok_or(ProviderCallError::MissingField {
            step,
            field: "openid",
        })
}

fn parse_profile_response(body: &str) -> Result<ProviderProfile, ProfileError> {
    let step = ProviderStep::ProfileFetch;
    let object = parse_json_object(step, strip_jsonp(body))?;
    let profile: ProviderProfile = serde_json::from_value(Value::Object(object)).map_err(|e| {
        ProviderCallError::InvalidResponse {
            step,
            reason: e.to_string(),
        }
    })?;

    if profile.ret != 0 {
        return Err(ProviderCallError::Provider {
            step,
            code: profile.ret.to_string(),
            description: profile.msg,
        });
    }

    Ok(profile)
}
