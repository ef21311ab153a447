//! HTTP chat-gateway implementation of the channel adapter

use async_trait::async_trait;
use classline_common::config::ChannelConfig;
use classline_common::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::adapter::{ChannelAdapter, ChannelError};

/// Chat gateway client.
///
/// Talks to the external messaging gateway over HTTP with a bearer token.
/// One client is shared by the adapter and the directory.
#[derive(Clone)]
pub struct GatewayAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    message_id: String,
}

impl GatewayAdapter {
    /// Create a new gateway adapter from configuration
    pub fn new(config: &ChannelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn api_token(&self) -> &str {
        &self.api_token
    }
}

/// Map a gateway response status to the channel error taxonomy.
///
/// 429 and server errors are provider hiccups worth retrying; the remaining
/// client errors mean the request itself can never succeed (unknown chat,
/// revoked token, rejected payload).
fn classify_status(status: StatusCode, body: &str) -> ChannelError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ChannelError::Transient(format!("gateway returned {}: {}", status, body))
    } else {
        ChannelError::Permanent(format!("gateway returned {}: {}", status, body))
    }
}

#[async_trait]
impl ChannelAdapter for GatewayAdapter {
    async fn send(&self, chat_id: &str, text: &str) -> std::result::Result<String, ChannelError> {
        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&SendMessageBody { chat_id, text })
            .send()
            .await
            .map_err(|e| ChannelError::Transient(format!("gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Transient(format!("invalid gateway response: {}", e)))?;

        debug!(chat_id, message_id = %parsed.message_id, "Gateway accepted message");

        Ok(parsed.message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> ChannelConfig {
        ChannelConfig {
            base_url,
            api_token: "test-token".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_send_returns_provider_message_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(bearer_token("test-token"))
            .and(body_json(serde_json::json!({
                "chat_id": "chat-1",
                "text": "hello"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"message_id": "wamid.123"})),
            )
            .mount(&server)
            .await;

        let adapter = GatewayAdapter::new(&test_config(server.uri())).unwrap();
        let id = adapter.send("chat-1", "hello").await.unwrap();
        assert_eq!(id, "wamid.123");
    }

    #[tokio::test]
    async fn test_unknown_chat_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown chat"))
            .mount(&server)
            .await;

        let adapter = GatewayAdapter::new(&test_config(server.uri())).unwrap();
        let err = adapter.send("nope", "hello").await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = GatewayAdapter::new(&test_config(server.uri())).unwrap();
        let err = adapter.send("chat-1", "hello").await.unwrap_err();
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let adapter = GatewayAdapter::new(&test_config(server.uri())).unwrap();
        let err = adapter.send("chat-1", "hello").await.unwrap_err();
        assert!(!err.is_permanent());
    }
}
