//! HTTP transport for single webhook delivery attempts.
//!
//! Issues one bounded POST per call and classifies the outcome. The client
//! is explicitly constructed and injected; timeout and body cap are fixed
//! at construction, never read from global state.

use std::time::Duration;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Hard cap on how much of a response body is read, regardless of declared
/// length. Bounds memory against malicious or misconfigured receivers.
pub const MAX_RESPONSE_BODY_BYTES: usize = 1024 * 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Overall timeout for one delivery attempt.
    pub timeout: Duration,
    /// User agent string identifying the engine to receivers.
    pub user_agent: String,
    /// Maximum response body bytes retained for diagnostics.
    pub max_response_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Courier-Webhook/1.0".to_string(),
            max_response_bytes: MAX_RESPONSE_BODY_BYTES,
        }
    }
}

/// Response from a successful (2xx) delivery attempt.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code in [200, 300).
    pub status_code: u16,
    /// Response body, truncated to the configured cap.
    pub body: String,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
}

/// HTTP client for webhook delivery.
///
/// Connection pooling comes from the underlying `reqwest` client; one
/// instance is shared across all deliveries.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Performs a single delivery attempt against the target URL.
    ///
    /// Posts the payload as JSON and classifies the outcome: 2xx returns the
    /// response, non-2xx returns `HttpStatus` carrying the code and a body
    /// snippet, and transport failures return `Network`/`Timeout`. A non-2xx
    /// status never follows the success path.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the overall attempt deadline is exceeded
    /// - `Network` for connection-level failures
    /// - `HttpStatus` for any response outside [200, 300)
    pub async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<TransportResponse> {
        let start = std::time::Instant::now();

        let span = info_span!("webhook_delivery", url = %url);

        async move {
            debug!("starting delivery attempt");

            let response = match self
                .client
                .post(url)
                .header("content-type", "application/json")
                .json(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();
            let body = self.read_capped_body(response).await?;
            let duration = start.elapsed();

            debug!(status = status_code, duration_ms = duration.as_millis(), "received response");

            if is_success {
                tracing::info!(status = status_code, "webhook delivered");
                Ok(TransportResponse { status_code, body, duration })
            } else {
                tracing::warn!(status = status_code, "endpoint rejected delivery");
                Err(DeliveryError::http_status(status_code, body))
            }
        }
        .instrument(span)
        .await
    }

    /// Reads at most `max_response_bytes` of the response body.
    ///
    /// Streams chunks so an oversized body is never buffered whole; the
    /// remainder of the stream is dropped once the cap is reached.
    async fn read_capped_body(&self, mut response: reqwest::Response) -> Result<String> {
        let cap = self.config.max_response_bytes;
        let mut buffer = BytesMut::new();

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    return Err(DeliveryError::network(format!(
                        "failed to read response body: {e}"
                    )));
                },
            };

            let remaining = cap.saturating_sub(buffer.len());
            if chunk.len() >= remaining {
                buffer.extend_from_slice(&chunk[..remaining]);
                break;
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn payload() -> serde_json::Value {
        serde_json::json!({"event": "booking.confirmed", "id": 42})
    }

    #[tokio::test]
    async fn successful_delivery_returns_response() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hooks"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("accepted"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response =
            client.send(&format!("{}/hooks", mock_server.uri()), &payload()).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "accepted");
    }

    #[tokio::test]
    async fn identifying_user_agent_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header("user-agent", "Courier-Webhook/1.0"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        client.send(&mock_server.uri(), &payload()).await.unwrap();

        mock_server.verify().await;
    }

    #[tokio::test]
    async fn non_2xx_never_follows_the_success_path() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such hook"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let err = client.send(&mock_server.uri(), &payload()).await.unwrap_err();

        match err {
            DeliveryError::HttpStatus { status_code, body } => {
                assert_eq!(status_code, 404);
                assert_eq!(body, "no such hook");
            },
            other => panic!("expected HttpStatus error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_body() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let err = client.send(&mock_server.uri(), &payload()).await.unwrap_err();

        assert!(matches!(err, DeliveryError::HttpStatus { status_code: 503, .. }));
        assert_eq!(err.response_code(), 503);
    }

    #[tokio::test]
    async fn connection_failure_is_a_network_error() {
        // Port 9 (discard) is near-certainly closed.
        let client = DeliveryClient::with_defaults().unwrap();
        let err = client.send("http://127.0.0.1:9/hooks", &payload()).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Network { .. }));
        assert_eq!(err.response_code(), 0);
    }

    #[tokio::test]
    async fn oversized_response_body_is_truncated_to_the_cap() {
        let mock_server = MockServer::start().await;

        let two_mib = vec![b'x'; 2 * 1024 * 1024];
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(two_mib))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let response = client.send(&mock_server.uri(), &payload()).await.unwrap();

        assert_eq!(response.body.len(), MAX_RESPONSE_BODY_BYTES);
    }

    #[tokio::test]
    async fn small_cap_is_honoured() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("0123456789"))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { max_response_bytes: 4, ..ClientConfig::default() };
        let client = DeliveryClient::new(config).unwrap();
        let response = client.send(&mock_server.uri(), &payload()).await.unwrap();

        assert_eq!(response.body, "0123");
    }
}
