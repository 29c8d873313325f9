//! Universal client: transport auto-detection from an address string.

use crate::config::ProtocolConfig;
use crate::error::{ReplError, Result};
use crate::transport::tcp::TcpClient;
use crate::transport::unix::UnixClient;
use crate::transport::EvalResult;

/// The transport a given address resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    InProcess,
    Unix,
    Tcp,
}

/// Detect the transport for an address string and strip any scheme prefix.
///
/// Rules, in order:
/// 1. `unix://` prefix: unix socket, prefix stripped.
/// 2. `tcp://` prefix: TCP, prefix stripped.
/// 3. `""` or `"in-process"`: in-process.
/// 4. A leading `/` or `.`: unix socket path.
/// 5. Anything else: TCP `host:port`.
pub fn detect_transport(addr: &str) -> (Transport, &str) {
    if let Some(path) = addr.strip_prefix("unix://") {
        return (Transport::Unix, path);
    }
    if let Some(hostport) = addr.strip_prefix("tcp://") {
        return (Transport::Tcp, hostport);
    }
    if addr.is_empty() || addr == "in-process" {
        return (Transport::InProcess, addr);
    }
    if addr.starts_with('/') || addr.starts_with('.') {
        return (Transport::Unix, addr);
    }
    (Transport::Tcp, addr)
}

enum ClientInner {
    Unix(UnixClient),
    Tcp(TcpClient),
}

/// A client that picks its transport from the address it is given.
///
/// The in-process transport is not address-dialable: it needs a direct
/// server reference, so `connect` refuses in-process addresses. Use
/// [`crate::transport::inprocess::InProcessClient`] directly instead.
pub struct ReplClient {
    inner: Option<ClientInner>,
}

impl ReplClient {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Connect to a server, auto-detecting the transport. Uses the default
    /// codec.
    pub async fn connect(&mut self, addr: &str) -> Result<()> {
        let (transport, target) = detect_transport(addr);
        match transport {
            Transport::InProcess => Err(ReplError::InvalidAddress(
                "in-process transport requires a direct server reference".to_string(),
            )),
            Transport::Unix => {
                let client = UnixClient::new();
                client.connect(target, ProtocolConfig::DEFAULT_CODEC).await?;
                self.inner = Some(ClientInner::Unix(client));
                Ok(())
            }
            Transport::Tcp => {
                let client = TcpClient::new();
                client.connect(target, ProtocolConfig::DEFAULT_CODEC).await?;
                self.inner = Some(ClientInner::Tcp(client));
                Ok(())
            }
        }
    }

    /// Send code for evaluation and await the response.
    pub async fn eval(&self, code: &str) -> Result<EvalResult> {
        match &self.inner {
            Some(ClientInner::Unix(client)) => client.eval(code).await,
            Some(ClientInner::Tcp(client)) => client.eval(code).await,
            None => Err(ReplError::NotConnected),
        }
    }

    /// Close the underlying connection. A no-op when never connected.
    pub async fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(ClientInner::Unix(client)) => client.close().await,
            Some(ClientInner::Tcp(client)) => client.close().await,
            None => Ok(()),
        }
    }
}

impl Default for ReplClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_scheme_prefixes() {
        assert_eq!(
            detect_transport("unix:///tmp/repl.sock"),
            (Transport::Unix, "/tmp/repl.sock")
        );
        assert_eq!(
            detect_transport("tcp://localhost:5555"),
            (Transport::Tcp, "localhost:5555")
        );
    }

    #[test]
    fn detect_in_process_addresses() {
        assert_eq!(detect_transport(""), (Transport::InProcess, ""));
        assert_eq!(
            detect_transport("in-process"),
            (Transport::InProcess, "in-process")
        );
    }

    #[test]
    fn detect_paths_as_unix() {
        assert_eq!(
            detect_transport("/var/run/repl.sock"),
            (Transport::Unix, "/var/run/repl.sock")
        );
        assert_eq!(
            detect_transport("./repl.sock"),
            (Transport::Unix, "./repl.sock")
        );
    }

    #[test]
    fn detect_host_port_as_tcp() {
        assert_eq!(
            detect_transport("localhost:5555"),
            (Transport::Tcp, "localhost:5555")
        );
        assert_eq!(detect_transport(":5555"), (Transport::Tcp, ":5555"));
    }

    #[tokio::test]
    async fn connect_refuses_in_process_addresses() {
        let mut client = ReplClient::new();
        let err = client.connect("in-process").await.unwrap_err();
        assert!(matches!(err, ReplError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn eval_before_connect_is_not_connected() {
        let client = ReplClient::new();
        let err = client.eval("(+ 1 2)").await.unwrap_err();
        assert!(matches!(err, ReplError::NotConnected));
    }

    #[tokio::test]
    async fn close_without_connect_is_a_no_op() {
        let mut client = ReplClient::new();
        client.close().await.unwrap();
    }
}
