//! HTTP transport used for the provider calls.

use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Status and body of a provider response. The body is untrusted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Generic HTTP client. Timeouts and retries belong here, not to the flow.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: Url) -> Result<TransportResponse, TransportError>;
}

/// [`HttpTransport`] over a shared `reqwest` connection pool.
#[derive(Clone)]
pub struct ReqwestTransport {
    http_client: Client,
}

impl ReqwestTransport {
    pub fn new(http_timeout_seconds: u64) -> Result<Self, TransportError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(http_timeout_seconds))
            .build()?;

        Ok(Self { http_client })
    }

    pub fn from_client(http_client: Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: Url) -> Result<TransportResponse, TransportError> {
        // Query strings carry secrets; reqwest would echo the URL in its errors.
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(reqwest::Error::without_url)?;

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reqwest_transport_returns_status_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2.0/me"))
            .and(query_param("access_token", "T1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("callback( {} );"))
            .mount(&mock_server)
            .await;

        let transport = ReqwestTransport::new(5).unwrap();
        let url =
            Url::parse(&format!("{}/oauth2.0/me?access_token=T1", mock_server.uri())).unwrap();
        let response = transport.get(url).await.unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, "callback( {} );");
    }

    #[tokio::test]
    async fn test_non_success_status_is_not_an_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let transport = ReqwestTransport::new(5).unwrap();
        let response = transport
            .get(Url::parse(&mock_server.uri()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert!(!response.is_success());
    }

    /// Address of a port nothing listens on.
    fn closed_port_url(path_and_query: &str) -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("http://{}{}", addr, path_and_query)).unwrap()
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let transport = ReqwestTransport::new(5).unwrap();
        let result = transport.get(closed_port_url("/oauth2.0/me")).await;
        assert!(matches!(result, Err(TransportError::HttpError(_))));
    }

    #[tokio::test]
    async fn test_connection_failure_does_not_echo_query() {
        let transport = ReqwestTransport::new(5).unwrap();
        let url = closed_port_url("/oauth2.0/me?access_token=SECRET_TOKEN");

        let err = transport.get(url).await.unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("SECRET_TOKEN"), "{}", message);
        assert!(!message.contains("access_token"), "{}", message);
    }
}
