//! Error types for the REPL protocol engine.
//!
//! Transport and protocol failures surface here; Lisp evaluation errors do
//! not. An evaluation error travels inside a response message as ordinary
//! data with `status=["done"]` and never becomes a `ReplError`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ReplError>;

/// Main error type for the REPL protocol engine.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported codec format: {0}")]
    UnsupportedCodec(String),

    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("server stopped")]
    ServerStopped,

    #[error("server already started")]
    AlreadyStarted,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("record exceeds maximum size of {max} bytes")]
    RecordTooLarge { max: usize },
}
