//! Seam to the inference backend executing model inference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::NetworkError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    /// Model identifiers hosted by this backend.
    async fn list_models(&self) -> Result<Vec<String>, NetworkError>;

    /// Starts a streaming chat completion. Chunks arrive on the returned
    /// channel in generation order; a `Backend` error item ends the stream.
    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<Value, NetworkError>>, NetworkError>;
}
