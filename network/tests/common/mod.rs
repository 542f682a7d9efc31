//! Shared test doubles: an in-memory substrate over duplex pipes and a
//! scripted inference backend.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use libp2p::{PeerId, StreamProtocol};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::compat::TokioAsyncReadCompatExt;

use network::backend::{ChatRequest, InferenceBackend};
use network::catalog::ContentAddress;
use network::error::NetworkError;
use network::substrate::{ProtocolStream, Substrate};

/// Both ends of an in-memory protocol stream.
pub fn stream_pair() -> (ProtocolStream, ProtocolStream) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (Box::new(a.compat()), Box::new(b.compat()))
}

type ServerSpawn = Box<dyn Fn(PeerId, StreamProtocol, ProtocolStream) + Send + Sync>;

/// Substrate double: every dial hands the server end of a fresh duplex pipe
/// to the configured server function and returns the client end.
pub struct MockSubstrate {
    server: Option<ServerSpawn>,
    pub dials: AtomicUsize,
    pub provided: Mutex<Vec<ContentAddress>>,
}

impl MockSubstrate {
    pub fn new(server: ServerSpawn) -> Self {
        Self {
            server: Some(server),
            dials: AtomicUsize::new(0),
            provided: Mutex::new(Vec::new()),
        }
    }

    /// A substrate that refuses every dial.
    pub fn refusing() -> Self {
        Self {
            server: None,
            dials: AtomicUsize::new(0),
            provided: Mutex::new(Vec::new()),
        }
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Substrate for MockSubstrate {
    async fn dial(
        &self,
        peer: PeerId,
        protocol: StreamProtocol,
    ) -> Result<ProtocolStream, NetworkError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match &self.server {
            Some(server) => {
                let (client, remote) = stream_pair();
                server(peer, protocol, remote);
                Ok(client)
            }
            None => Err(NetworkError::Dial("connection refused".into())),
        }
    }

    async fn provide(&self, address: ContentAddress) -> Result<(), NetworkError> {
        self.provided.lock().unwrap().push(address);
        Ok(())
    }
}

/// Backend double answering with fixed models and scripted chunks.
pub struct MockBackend {
    pub models: Vec<String>,
    pub chunks: Vec<Value>,
    /// Error sent after the scripted chunks, if any.
    pub trailing_error: Option<String>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl MockBackend {
    pub fn new(models: Vec<String>, chunks: Vec<Value>) -> Self {
        Self {
            models,
            chunks,
            trailing_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn list_models(&self) -> Result<Vec<String>, NetworkError> {
        Ok(self.models.clone())
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<Value, NetworkError>>, NetworkError> {
        self.requests.lock().unwrap().push(request);
        let (tx, rx) = mpsc::channel(16);
        let chunks = self.chunks.clone();
        let trailing_error = self.trailing_error.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(error) = trailing_error {
                let _ = tx.send(Err(NetworkError::Backend(error))).await;
            }
        });
        Ok(rx)
    }
}
