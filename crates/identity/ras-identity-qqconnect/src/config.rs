//! QQ Connect configuration types.

use crate::error::{FlowError, FlowResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://graph.qq.com/oauth2.0/authorize";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://graph.qq.com/oauth2.0/token";
pub const DEFAULT_OPENID_ENDPOINT: &str = "https://graph.qq.com/oauth2.0/me";
pub const DEFAULT_USER_INFO_ENDPOINT: &str = "https://graph.qq.com/user/get_user_info";

/// Whether a bare 401 triggers the QQ Connect challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationMode {
    /// Any 401 is turned into a challenge.
    Active,
    /// Only an explicit challenge for this scheme is acted on.
    Passive,
}

/// QQ Connect client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QqConnectConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub openid_endpoint: String,
    pub user_info_endpoint: String,
    pub scopes: Vec<String>,
    /// Path the provider redirects back to, relative to the host's path base.
    pub callback_path: String,
    pub authentication_scheme: String,
    /// Scheme the identity is relabelled to before it reaches the sign-in sink.
    pub sign_in_scheme: Option<String>,
    pub authentication_mode: AuthenticationMode,
    pub correlation_cookie_name: String,
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    /// Copy the access token into the identity claims.
    pub save_tokens: bool,
}

impl Default for QqConnectConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            openid_endpoint: DEFAULT_OPENID_ENDPOINT.to_string(),
            user_info_endpoint: DEFAULT_USER_INFO_ENDPOINT.to_string(),
            scopes: vec!["get_user_info".to_string()],
            callback_path: "/signin-qqconnect".to_string(),
            authentication_scheme: "QQConnect".to_string(),
            sign_in_scheme: None,
            authentication_mode: AuthenticationMode::Active,
            correlation_cookie_name: ".Correlation.QQConnect".to_string(),
            state_ttl_seconds: 600, // 10 minutes
            http_timeout_seconds: 30,
            save_tokens: false,
        }
    }
}

impl QqConnectConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Self::default()
        }
    }

    /// Point every provider endpoint at another origin, keeping QQ's paths.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.authorization_endpoint = format!("{}/oauth2.0/authorize", base);
        self.token_endpoint = format!("{}/oauth2.0/token", base);
        self.openid_endpoint = format!("{}/oauth2.0/me", base);
        self.user_info_endpoint = format!("{}/user/get_user_info", base);
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = path.into();
        self
    }

    pub fn with_sign_in_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.sign_in_scheme = Some(scheme.into());
        self
    }

    pub fn with_authentication_mode(mut self, mode: AuthenticationMode) -> Self {
        self.authentication_mode = mode;
        self
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_save_tokens(mut self, save: bool) -> Self {
        self.save_tokens = save;
        self
    }

    /// QQ expects a comma separated scope list.
    pub fn scope_param(&self) -> String {
        self.scopes.join(",")
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(FlowError::ConfigError("client_id is required".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(FlowError::ConfigError(
                "client_secret is required".to_string(),
            ));
        }
        if !self.callback_path.starts_with('/') {
            return Err(FlowError::ConfigError(format!(
                "callback_path must start with '/': {}",
                self.callback_path
            )));
        }
        if self.correlation_cookie_name.trim().is_empty() {
            return Err(FlowError::ConfigError(
                "correlation_cookie_name is required".to_string(),
            ));
        }
        for endpoint in [
            &self.authorization_endpoint,
            &self.token_endpoint,
            &self.openid_endpoint,
            &self.user_info_endpoint,
        ] {
            url::Url::parse(endpoint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_target_qq() {
        let config = QqConnectConfig::new("101", "secret");
        assert_eq!(config.authorization_endpoint, DEFAULT_AUTHORIZATION_ENDPOINT);
        assert_eq!(config.callback_path, "/signin-qqconnect");
        assert_eq!(config.scope_param(), "get_user_info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_rewrites_endpoints() {
        let config = QqConnectConfig::new("101", "secret").with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.token_endpoint, "http://127.0.0.1:9000/oauth2.0/token");
        assert_eq!(
            config.user_info_endpoint,
            "http://127.0.0.1:9000/user/get_user_info"
        );
    }

    #[test]
    fn test_validate_rejects_incomplete_config() {
        assert!(QqConnectConfig::default().validate().is_err());
        assert!(
            QqConnectConfig::new("101", "secret")
                .with_callback_path("signin")
                .validate()
                .is_err()
        );

        let mut config = QqConnectConfig::new("101", "secret");
        config.token_endpoint = "not a url".to_string();
        assert!(matches!(config.validate(), Err(FlowError::UrlError(_))));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: QqConnectConfig = serde_json::from_value(serde_json::json!({
            "client_id": "101",
            "client_secret": "secret",
            "scopes": ["get_user_info", "get_vip_info"],
            "authentication_mode": "Passive"
        }))
        .unwrap();

        assert_eq!(config.scope_param(), "get_user_info,get_vip_info");
        assert_eq!(config.authentication_mode, AuthenticationMode::Passive);
        assert_eq!(config.state_ttl_seconds, 600);
    }
}
