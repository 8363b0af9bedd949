//! Streaming LLM client.
//!
//! The [`LlmClient`] trait hides the provider behind a seam tests can
//! substitute. The HTTP implementation speaks the OpenAI-compatible
//! `/chat/completions` SSE protocol and forwards delta tokens through a
//! channel bounded to a single element, so a slow consumer applies
//! natural backpressure to the producer and a dropped consumer cancels
//! the generation at the next suspension point.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::LlmConfig;
use crate::error::{CodedocError, CodedocResult};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System prompt.
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// An ordered stream of generation tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = CodedocResult<String>> + Send>>;

/// Streaming chat completion provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a streaming generation for the given message sequence.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> CodedocResult<TokenStream>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    inflight: Arc<Semaphore>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl HttpLlmClient {
    /// Build the client from config. Returns an error when no endpoint
    /// is configured.
    pub fn from_config(config: &LlmConfig) -> CodedocResult<Self> {
        let endpoint = config.endpoint.as_ref().ok_or_else(|| CodedocError::Config {
            details: "llm.endpoint is not configured".into(),
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            inflight: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> CodedocResult<TokenStream> {
        let permit = self
            .inflight
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CodedocError::Internal(format!("llm semaphore closed: {e}")))?;

        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(CodedocError::RateLimited { provider: "llm".into(), message: body });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(CodedocError::ProviderUnavailable {
                provider: "llm".into(),
                message: format!("{status}: {body}"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CodedocError::ProviderProtocol {
                provider: "llm".into(),
                message: format!("{status}: {body}"),
            });
        }

        // Capacity 1: the SSE reader blocks until the consumer pulls.
        let (tx, rx) = mpsc::channel::<CodedocResult<String>>(1);

        tokio::spawn(async move {
            let _permit = permit;
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(next) = bytes.next().await {
                let piece = match next {
                    Ok(piece) => piece,
                    Err(e) => {
                        let _ = tx
                            .send(Err(CodedocError::Generation {
                                message: format!("stream read failed: {e}"),
                            }))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&piece));

                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let token = chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content);
                            if let Some(token) = token {
                                if !token.is_empty() && tx.send(Ok(token)).await.is_err() {
                                    // Consumer went away: cancel generation.
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable SSE frame");
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_roles_serialize_lowercase() {
        let m = ChatMessage::system("You are helpful.");
        let json = serde_json::to_value(&m).expect("serialize");
        assert_eq!(json["role"], "system");

        let m = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&m).expect("serialize");
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).expect("parse");
        assert_eq!(
            chunk.choices[0].delta.content.as_deref(),
            Some("Hello")
        );

        // Role-only frames carry no content.
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).expect("parse");
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
