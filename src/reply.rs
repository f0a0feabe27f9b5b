//! Reply service client
//!
//! The reply service accepts the conversation so far plus the chat id and
//! streams the assistant reply back as `data:` lines. This module defines
//! the [`ReplyService`] seam the orchestrator drives, and
//! [`HttpReplyClient`], the production implementation over `reqwest`.

use crate::config::ServiceConfig;
use crate::error::{ParlanceError, Result};
use crate::transcript::Role;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// One entry of the outbound message list.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    /// Author role, serialized lowercase
    pub role: Role,
    /// Message text
    pub content: String,
}

/// Request body for the streamed-reply POST.
#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    messages: &'a [OutboundMessage],
    #[serde(rename = "chatId")]
    chat_id: &'a str,
}

/// Error body shape returned by the service on non-success responses.
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    error: Option<String>,
}

/// The chunked reply body as a fallible byte stream.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Seam between the orchestrator and the reply transport.
///
/// The production implementation is [`HttpReplyClient`]; tests substitute
/// channel-backed fakes to drive the orchestrator chunk by chunk.
#[async_trait]
pub trait ReplyService: Send + Sync {
    /// Open a streamed reply for the given conversation.
    ///
    /// # Errors
    ///
    /// Returns [`ParlanceError::Http`] when the request cannot be made and
    /// [`ParlanceError::Service`] when the service answers non-2xx; the
    /// service's own `{"error": ...}` text is carried verbatim when present.
    async fn open_reply(
        &self,
        messages: &[OutboundMessage],
        chat_id: &str,
    ) -> Result<ReplyStream>;
}

/// HTTP client for the reply service.
pub struct HttpReplyClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpReplyClient {
    /// Build a client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(ParlanceError::Http)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ReplyService for HttpReplyClient {
    async fn open_reply(
        &self,
        messages: &[OutboundMessage],
        chat_id: &str,
    ) -> Result<ReplyStream> {
        let body = ReplyRequest { messages, chat_id };

        tracing::debug!(
            "opening reply stream: {} messages for chat {}",
            messages.len(),
            chat_id
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("reply request failed: {}", e);
                ParlanceError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("reply service returned {}: {}", status, error_text);

            let message = serde_json::from_str::<ServiceErrorBody>(&error_text)
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| "Failed to get response".to_string());

            return Err(ParlanceError::Service(message).into());
        }

        use futures::StreamExt;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ParlanceError::Http(e).into()));

        Ok(Box::pin(stream))
    }
}
