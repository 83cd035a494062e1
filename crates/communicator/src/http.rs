//! HTTP transport to the coordinator endpoint

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use relay_core::{CommunicatorConfig, Error, ErrorResponse, Message, Result, Transport};

/// Posts envelopes to the coordinator over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for `url`; without a timeout requests wait indefinitely
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| Error::Transport {
            message: format!("failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &CommunicatorConfig) -> Result<Self> {
        Self::new(config.coordinator_url.clone(), config.request_timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Turn a non-success response into a rejection
    async fn handle_error_response(response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        match response.json::<ErrorResponse>().await {
            Ok(body) => Error::Rejected {
                status,
                kind: body.error,
                message: body.message,
            },
            Err(_) => Error::Rejected {
                status,
                kind: "unknown".to_string(),
                message: "request failed".to_string(),
            },
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, request: Message) -> Result<Vec<Message>> {
        debug!(request_type = %request.request_type, sender_id = request.sender_id, "Sending request");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport {
                message: format!("failed to send {}: {}", request.request_type, e),
            })?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let bytes = response.bytes().await.map_err(|e| Error::Transport {
            message: format!("failed to read {} reply: {}", request.request_type, e),
        })?;
        Message::decode_reply(&bytes)
    }
}
