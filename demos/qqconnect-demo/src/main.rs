use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use ras_identity_qqconnect::{
    AuthFlowController, AuthenticationHandler, AuthenticationMode, CancellationToken,
    ChallengeRequest, HandleOutcome, HostExchange, QqConnectConfig, RequestContext, StateKey,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

mod session;

use session::{CookieCorrelationStore, JwtSessionSink, SESSION_COOKIE, verify_session};

/// Configuration for the QQ Connect demo
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub qq_client_id: String,
    pub qq_client_secret: String,
    /// Externally visible origin, used to build the redirect URI.
    pub public_url: Url,
    /// Hex encoded 32 byte key sealing the `state` parameter.
    pub state_key: Option<String>,
    pub jwt_secret: String,
    pub passive: bool,
    pub server_host: String,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let public_url = std::env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            qq_client_id: std::env::var("QQ_CLIENT_ID")
                .context("QQ_CLIENT_ID environment variable is required")?,
            qq_client_secret: std::env::var("QQ_CLIENT_SECRET")
                .context("QQ_CLIENT_SECRET environment variable is required")?,
            public_url: Url::parse(&public_url).context("PUBLIC_URL must be an absolute URL")?,
            state_key: std::env::var("QQ_STATE_KEY").ok(),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "change-me-in-production-please".to_string()),
            passive: std::env::var("QQ_PASSIVE").is_ok_and(|v| v == "true" || v == "1"),
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: std::env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
        })
    }

    fn secure_cookies(&self) -> bool {
        self.public_url.scheme() == "https"
    }

    /// Describe an inbound request as seen from outside.
    fn request_context(&self, uri: &Uri) -> RequestContext {
        let mut host = self.public_url.host_str().unwrap_or("localhost").to_string();
        if let Some(port) = self.public_url.port() {
            host.push_str(&format!(":{}", port));
        }

        let mut request = RequestContext::new(self.public_url.scheme(), host, uri.path())
            .with_path_base(self.public_url.path().trim_end_matches('/'));
        if let Some(query) = uri.query() {
            request = request.with_query(query);
        }
        request
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub controller: Arc<AuthFlowController>,
}

impl AppState {
    fn session_sink(&self) -> JwtSessionSink {
        JwtSessionSink::new(self.config.jwt_secret.clone(), chrono::Duration::hours(24))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    return_to: Option<String>,
}

fn create_controller(config: &AppConfig) -> Result<AuthFlowController> {
    let mode = if config.passive {
        AuthenticationMode::Passive
    } else {
        AuthenticationMode::Active
    };
    let qq_config = QqConnectConfig::new(&config.qq_client_id, &config.qq_client_secret)
        .with_sign_in_scheme("Cookies")
        .with_authentication_mode(mode)
        .with_state_ttl(600) // 10 minutes
        .with_http_timeout(30);

    let key = match config.state_key.as_deref() {
        Some(hex) => StateKey::from_hex(hex).context("QQ_STATE_KEY must be 64 hex characters")?,
        None => {
            warn!(
                "QQ_STATE_KEY not set, generated a random key; logins will not survive a restart"
            );
            StateKey::generate()
        }
    };

    AuthFlowController::with_state_key(qq_config, &key).context("Invalid QQ Connect configuration")
}

async fn index_handler() -> Html<&'static str> {
    Html(
        r#"
<!DOCTYPE html>
<html>
<head><title>QQ Connect Demo</title></head>
<body>
    <h1>QQ Connect Demo</h1>
    <p><a href="/login?return_to=/me">Log in with QQ</a></p>
    <p><a href="/me">Show my session</a></p>
</body>
</html>
    "#,
    )
}

/// Only same-site paths are honored; anything else returns to `/`.
fn local_return_to(return_to: Option<String>) -> String {
    match return_to {
        Some(target)
            if target.starts_with('/')
                && !target.starts_with("//")
                && !target.starts_with("/\\") =>
        {
            target
        }
        _ => "/".to_string(),
    }
}

/// Explicit challenge, always redirects to QQ.
async fn login_handler(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    uri: Uri,
    jar: CookieJar,
) -> Response {
    let request = state.config.request_context(&uri);
    let store = CookieCorrelationStore::new(jar, state.config.secure_cookies());
    let challenge = ChallengeRequest::new(local_return_to(query.return_to));

    match state.controller.apply_challenge_response(
        StatusCode::UNAUTHORIZED,
        Some(challenge),
        &request,
        &store,
    ) {
        Ok(Some(redirect)) => (store.into_jar(), Redirect::to(&redirect.location)).into_response(),
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            error!("Failed to start QQ Connect login: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn callback_handler(State(state): State<AppState>, uri: Uri, jar: CookieJar) -> Response {
    let request = state.config.request_context(&uri);
    let store = CookieCorrelationStore::new(jar, state.config.secure_cookies());
    let sink = state.session_sink();

    // Dropping the handler future abandons any outstanding provider call.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let outcome = state
        .controller
        .handle(HostExchange {
            request: &request,
            correlation: &store,
            sign_in: &sink,
            cancel,
        })
        .await;

    let mut jar = store.into_jar();
    if let Some(token) = sink.take_token() {
        jar = jar.add(JwtSessionSink::session_cookie(
            token,
            state.config.secure_cookies(),
        ));
    }

    match outcome {
        HandleOutcome::Redirect(redirect) => {
            (jar, Redirect::to(&redirect.location)).into_response()
        }
        HandleOutcome::Error { status, reason } => {
            (status, jar, format!("Login failed: {}", reason)).into_response()
        }
        HandleOutcome::NotHandled => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Protected resource. Unauthenticated requests are challenged in active mode.
async fn me_handler(State(state): State<AppState>, uri: Uri, jar: CookieJar) -> Response {
    if let Some(claims) = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| verify_session(cookie.value(), &state.config.jwt_secret))
    {
        return Json(claims).into_response();
    }

    let request = state.config.request_context(&uri);
    let store = CookieCorrelationStore::new(jar, state.config.secure_cookies());
    match state
        .controller
        .apply_challenge_response(StatusCode::UNAUTHORIZED, None, &request, &store)
    {
        Ok(Some(redirect)) => (store.into_jar(), Redirect::to(&redirect.location)).into_response(),
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            error!("Failed to challenge: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn logout_handler(jar: CookieJar) -> (CookieJar, Redirect) {
    (
        jar.remove(axum_extra::extract::cookie::Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qqconnect_demo=debug,ras_identity_qqconnect=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;
    info!("Starting QQ Connect demo server");

    let controller = create_controller(&config)?;
    let callback_path = controller.config().callback_path.clone();

    let app_state = AppState {
        config: Arc::new(config.clone()),
        controller: Arc::new(controller),
    };

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/login", get(login_handler))
        .route("/logout", get(logout_handler))
        .route("/me", get(me_handler))
        .route(&callback_path, get(callback_handler))
        .with_state(app_state);

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("Server running on http://{}", bind_addr);
    info!(
        "QQ Connect redirect URI: {}{}",
        config.public_url.as_str().trim_end_matches('/'),
        callback_path
    );
    warn!(
        "This is an example application. Do not use in production without proper security review."
    );

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_to_stays_on_site() {
        assert_eq!(local_return_to(Some("/orders?tab=1".to_string())), "/orders?tab=1");
        assert_eq!(local_return_to(None), "/");

        for target in [
            "https://attacker.example/",
            "//attacker.example/",
            "/\\attacker.example/",
            "javascript:alert(1)",
            "",
        ] {
            assert_eq!(local_return_to(Some(target.to_string())), "/", "{}", target);
        }
    }
}
