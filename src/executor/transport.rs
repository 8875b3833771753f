//! Transport Layer
//!
//! The executor only needs "send this document, give me status + envelope".
//! Anything that can do that implements [`Transport`].

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::models::{GraphqlRequest, GraphqlResponse};

/// Raw outcome of one upstream round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: GraphqlResponse,
}

impl TransportResponse {
    /// HTTP 200 with the given envelope.
    pub fn ok(body: GraphqlResponse) -> Self {
        Self { status: 200, body }
    }
}

/// The request never produced an HTTP response (connect, DNS, reset, bad body).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends one GraphQL request upstream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &GraphqlRequest) -> Result<TransportResponse, TransportError>;
}

// == HTTP Transport ==
/// POSTs `{query, variables}` as JSON to a GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            access_token: None,
        }
    }

    /// Sends `token` in `header` with every request.
    pub fn with_access_token(mut self, header: impl Into<String>, token: impl Into<String>) -> Self {
        self.access_token = Some((header.into(), token.into()));
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let transport = Self::new(config.endpoint.clone());
        match &config.access_token {
            Some(token) => transport.with_access_token(config.access_token_header.clone(), token.clone()),
            None => transport,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &GraphqlRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some((header, token)) = &self.access_token {
            builder = builder.header(header.as_str(), token.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(format!("request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError(format!("failed to read response body: {}", e)))?;

        match serde_json::from_slice::<GraphqlResponse>(&bytes) {
            Ok(body) => Ok(TransportResponse {
                status: status.as_u16(),
                body,
            }),
            // Error statuses often come with HTML or empty bodies; the status is what matters.
            Err(_) if !status.is_success() => Ok(TransportResponse {
                status: status.as_u16(),
                body: GraphqlResponse::default(),
            }),
            Err(e) => {
                debug!(status = status.as_u16(), "Unparseable GraphQL response body");
                Err(TransportError(format!("invalid GraphQL response body: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_sets_token() {
        let config = Config {
            endpoint: "https://shop.example/api/graphql".to_string(),
            access_token: Some("secret".to_string()),
            ..Config::default()
        };
        let transport = HttpTransport::from_config(&config);
        assert_eq!(transport.endpoint(), "https://shop.example/api/graphql");
        assert_eq!(
            transport.access_token,
            Some(("X-Access-Token".to_string(), "secret".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let transport = HttpTransport::new("http://127.0.0.1:9/graphql");
        let request = GraphqlRequest::new("{ shop { name } }", serde_json::Value::Null);
        assert!(transport.send(&request).await.is_err());
    }
}
