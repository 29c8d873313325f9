//! replisp — remote REPL protocol engine for Lisp dialects.
//!
//! Client programs submit source code to a server; the server delegates
//! evaluation to a pluggable evaluator and returns the result, captured
//! output, and status flags. Three interchangeable transports share one
//! message protocol and one client API:
//!
//! - **in-process**: typed queues within one address space, no codec
//! - **unix**: filesystem socket, newline-delimited JSON records
//! - **tcp**: network socket, newline-delimited JSON records
//!
//! The evaluator itself — tokenizer, parser, interpreter — is supplied by
//! the host as a plain function. Its errors-as-data convention matters for
//! consumers: a Lisp runtime error comes back as a structured value with
//! `status=["done"]`; only protocol and transport failures are errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use replisp::{new_server, ReplClient, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> replisp::Result<()> {
//!     let server = new_server(ServerConfig {
//!         transport: "tcp".to_string(),
//!         addr: "127.0.0.1:5555".to_string(),
//!         codec: String::new(), // defaults to "json"
//!         evaluator: my_evaluator(),
//!     })?;
//!     let runner = server.clone();
//!     tokio::spawn(async move { runner.start().await });
//!
//!     let mut client = ReplClient::new();
//!     client.connect("127.0.0.1:5555").await?;
//!     let result = client.eval("(+ 1 2)").await?;
//!     println!("{:?}", result.value);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod ops;
pub mod protocol;
pub mod transport;

pub use client::{detect_transport, ReplClient, Transport};
pub use config::{ProtocolConfig, TransportConfig};
pub use error::{ReplError, Result};
pub use ops::{BoxError, Evaluation, EvaluatorFn, Handler};
pub use protocol::codec::{new_codec, Codec};
pub use protocol::message::Message;
pub use transport::inprocess::{InProcessClient, InProcessServer};
pub use transport::tcp::{TcpClient, TcpServer};
pub use transport::unix::{UnixClient, UnixServer};
pub use transport::EvalResult;

use std::sync::Arc;
use std::time::Duration;

/// Configuration for creating a REPL server.
pub struct ServerConfig {
    /// Transport tag: "in-process" (or empty), "unix", or "tcp".
    pub transport: String,
    /// Bind address. Ignored for in-process; a filesystem path for unix;
    /// `host:port` for tcp.
    pub addr: String,
    /// Codec format name; empty defaults to "json".
    pub codec: String,
    /// The evaluator the server dispatches to.
    pub evaluator: EvaluatorFn,
}

/// A REPL server of any transport.
///
/// Cloneable handle over shared server state, so `start` can run in one
/// task while `stop` is called from another.
#[derive(Clone)]
pub enum ReplServer {
    InProcess(Arc<InProcessServer>),
    Unix(Arc<UnixServer>),
    Tcp(Arc<TcpServer>),
}

impl std::fmt::Debug for ReplServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::InProcess(_) => "InProcess",
            Self::Unix(_) => "Unix",
            Self::Tcp(_) => "Tcp",
        };
        f.debug_tuple("ReplServer").field(&variant).finish()
    }
}

impl ReplServer {
    /// Start serving. Blocks until [`Self::stop`] is called.
    pub async fn start(&self) -> Result<()> {
        match self {
            Self::InProcess(server) => server.start().await,
            Self::Unix(server) => server.start().await,
            Self::Tcp(server) => server.start().await,
        }
    }

    /// Gracefully shut down, waiting up to `grace` for in-flight work.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        match self {
            Self::InProcess(server) => server.stop(grace).await,
            Self::Unix(server) => server.stop(grace).await,
            Self::Tcp(server) => server.stop(grace).await,
        }
    }

    /// The server's address. Socket transports report the actual bound
    /// address once started.
    pub fn addr(&self) -> String {
        match self {
            Self::InProcess(server) => server.addr(),
            Self::Unix(server) => server.addr(),
            Self::Tcp(server) => server.addr(),
        }
    }

    /// Access the in-process server for direct client connections.
    ///
    /// Returns `None` for socket transports.
    pub fn in_process(&self) -> Option<&Arc<InProcessServer>> {
        match self {
            Self::InProcess(server) => Some(server),
            _ => None,
        }
    }
}

/// Create a REPL server for the configured transport.
pub fn new_server(config: ServerConfig) -> Result<ReplServer> {
    let codec = if config.codec.is_empty() {
        ProtocolConfig::DEFAULT_CODEC.to_string()
    } else {
        config.codec
    };

    match config.transport.as_str() {
        "in-process" | "" => Ok(ReplServer::InProcess(Arc::new(InProcessServer::new(
            config.evaluator,
        )))),
        "unix" => {
            if config.addr.is_empty() {
                return Err(ReplError::Config(
                    "unix transport requires an address".to_string(),
                ));
            }
            Ok(ReplServer::Unix(Arc::new(UnixServer::new(
                config.addr,
                codec,
                config.evaluator,
            ))))
        }
        "tcp" => {
            if config.addr.is_empty() {
                return Err(ReplError::Config(
                    "tcp transport requires an address".to_string(),
                ));
            }
            Ok(ReplServer::Tcp(Arc::new(TcpServer::new(
                config.addr,
                codec,
                config.evaluator,
            ))))
        }
        other => Err(ReplError::UnknownTransport(other.to_string())),
    }
}
