use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("framing error: {0}")]
    Framing(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("no peer available for model {0}")]
    NoPeerAvailable(String),
    #[error("inference backend error: {0}")]
    Backend(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}
