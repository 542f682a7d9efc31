//! Ollama-backed inference: model listing via `/api/tags` and streamed chat
//! completions via `/api/chat` (newline-delimited JSON).

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use network::backend::{ChatRequest, InferenceBackend};
use network::error::NetworkError;

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

#[derive(Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TaggedModel>,
}

#[derive(Debug, Deserialize)]
struct TaggedModel {
    name: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL)
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn list_models(&self) -> Result<Vec<String>, NetworkError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkError::Backend(format!("tags request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Backend(format!(
                "tags request failed with status {status}"
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| NetworkError::Backend(format!("malformed tags response: {e}")))?;
        let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        tracing::debug!(count = models.len(), "ollama reported hosted models");
        Ok(models)
    }

    async fn chat_stream(
        &self,
        mut request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<Value, NetworkError>>, NetworkError> {
        request.stream = true;
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| NetworkError::Backend(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Backend(format!(
                "chat request failed with status {status}: {body}"
            )));
        }

        tracing::debug!(model = %request.model, "chat stream opened");
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(error = %e, "chat stream broke");
                        let _ = tx
                            .send(Err(NetworkError::Backend(format!("chat stream broke: {e}"))))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    match parse_chunk_line(&line_bytes) {
                        Ok(None) => continue,
                        Ok(Some(chunk)) => {
                            let done = is_done(&chunk);
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "abandoning chat stream");
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // Stream ended; a trailing line without a newline still counts.
            if !buffer.is_empty() {
                match parse_chunk_line(&buffer) {
                    Ok(Some(chunk)) => {
                        let _ = tx.send(Ok(chunk)).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "trailing chat chunk was malformed");
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
        });

        Ok(rx)
    }
}

fn parse_chunk_line(line: &[u8]) -> Result<Option<Value>, NetworkError> {
    let line = std::str::from_utf8(line)
        .map_err(|e| NetworkError::Backend(format!("non-utf8 chat chunk: {e}")))?
        .trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| NetworkError::Backend(format!("malformed chat chunk: {e}")))
}

fn is_done(chunk: &Value) -> bool {
    chunk.get("done").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use network::backend::ChatMessage;
    use serde_json::json;

    #[test]
    fn parses_chunk_lines() {
        assert_eq!(parse_chunk_line(b"  \n").unwrap(), None);
        let chunk = parse_chunk_line(br#"{"message":{"role":"assistant","content":"hi"},"done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk["message"]["content"], json!("hi"));
        assert!(!is_done(&chunk));
        assert!(parse_chunk_line(b"not json").is_err());
    }

    #[tokio::test]
    async fn lists_models_from_tags() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"llama3.2:latest"},{"name":"qwen2.5:7b"}]}"#)
            .create_async()
            .await;

        let backend = OllamaBackend::new(server.url());
        let models = backend.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.2:latest", "qwen2.5:7b"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn streams_chat_chunks_in_order() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"a"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":"b"},"done":false}"#,
            "\n",
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
            "\n",
        );
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(body)
            .create_async()
            .await;

        let backend = OllamaBackend::new(server.url());
        let request = ChatRequest {
            model: "llama3.2:latest".to_string(),
            messages: vec![ChatMessage::user("hello")],
            stream: false,
        };
        let mut rx = backend.chat_stream(request).await.unwrap();

        let mut contents = Vec::new();
        let mut saw_done = false;
        while let Some(item) = rx.recv().await {
            let chunk = item.unwrap();
            if is_done(&chunk) {
                saw_done = true;
            } else {
                contents.push(chunk["message"]["content"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(contents, vec!["a", "b"]);
        assert!(saw_done);
    }

    #[tokio::test]
    async fn malformed_mid_stream_chunk_ends_the_stream_with_an_error() {
        let body = concat!(
            r#"{"message":{"role":"assistant","content":"a"},"done":false}"#,
            "\n",
            "this is not json\n",
            r#"{"message":{"role":"assistant","content":"b"},"done":false}"#,
            "\n",
        );
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(body)
            .create_async()
            .await;

        let backend = OllamaBackend::new(server.url());
        let request = ChatRequest {
            model: "llama3.2:latest".to_string(),
            messages: vec![ChatMessage::user("hello")],
            stream: true,
        };
        let mut rx = backend.chat_stream(request).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first["message"]["content"], json!("a"));

        match rx.recv().await.unwrap() {
            Err(NetworkError::Backend(msg)) => assert!(msg.contains("malformed")),
            other => panic!("expected backend error, got {other:?}"),
        }
        // The stream is abandoned after the bad chunk.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn chat_error_status_is_a_backend_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let backend = OllamaBackend::new(server.url());
        let request = ChatRequest {
            model: "llama3.2:latest".to_string(),
            messages: vec![ChatMessage::user("hello")],
            stream: true,
        };
        match backend.chat_stream(request).await {
            Err(NetworkError::Backend(msg)) => assert!(msg.contains("500")),
            other => panic!("expected backend error, got {:?}", other.map(|_| ())),
        }
    }
}
