//! TCP transport: network socket server and client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::TransportConfig;
use crate::error::{ReplError, Result};
use crate::ops::{EvaluatorFn, Handler};
use crate::protocol::codec::{new_codec, Codec};
use crate::transport::{exchange, serve_connection, ConnTracker, EvalResult};

/// TCP REPL server.
///
/// One accept task, one task per live connection, each connection with a
/// fresh codec instance. Requests on a connection are processed strictly
/// in order; connections are independent of each other.
pub struct TcpServer {
    addr: String,
    codec_name: String,
    handler: Arc<Handler>,
    bound: RwLock<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    tracker: Arc<ConnTracker>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServer {
    pub fn new(
        addr: impl Into<String>,
        codec_name: impl Into<String>,
        evaluator: EvaluatorFn,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            addr: addr.into(),
            codec_name: codec_name.into(),
            handler: Arc::new(Handler::new(evaluator)),
            bound: RwLock::new(None),
            shutdown,
            tracker: ConnTracker::new(),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind, launch the accept loop, and block until shutdown is
    /// requested. Binding to port 0 picks a free port; see [`Self::addr`].
    pub async fn start(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(ReplError::ServerStopped);
        }
        let listener = TcpListener::bind(&self.addr).await?;
        let local_addr = listener.local_addr()?;
        *self.bound.write().unwrap() = Some(local_addr);
        info!("tcp repl server listening on {local_addr}");

        let task = tokio::spawn(accept_loop(
            listener,
            self.codec_name.clone(),
            self.handler.clone(),
            self.tracker.clone(),
            self.shutdown.subscribe(),
        ));
        *self.accept_task.lock().await = Some(task);

        let mut shutdown_rx = self.shutdown.subscribe();
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Gracefully shut down: stop accepting, close live connections, and
    /// wait for every task bounded by `grace`.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let _ = self.shutdown.send(true);

        let accept_task = self.accept_task.lock().await.take();
        let drained = async {
            if let Some(task) = accept_task {
                let _ = task.await;
            }
            self.tracker.wait_idle().await;
        };
        tokio::time::timeout(grace, drained)
            .await
            .map_err(|_| ReplError::Timeout(grace))?;
        Ok(())
    }

    /// The actual bound address after start, the configured one before.
    pub fn addr(&self) -> String {
        match *self.bound.read().unwrap() {
            Some(addr) => addr.to_string(),
            None => self.addr.clone(),
        }
    }

    /// Number of currently live connections.
    pub fn live_connections(&self) -> usize {
        self.tracker.live()
    }
}

async fn accept_loop(
    listener: TcpListener,
    codec_name: String,
    handler: Arc<Handler>,
    tracker: Arc<ConnTracker>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted tcp connection from {peer}");
                    let conn_id = tracker.register();
                    let codec_name = codec_name.clone();
                    let handler = handler.clone();
                    let tracker = tracker.clone();
                    let conn_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, codec_name, handler, conn_shutdown).await;
                        tracker.deregister(conn_id);
                    });
                }
                Err(err) => {
                    error!("tcp accept error: {err}");
                }
            }
        }
    }
}

/// TCP REPL client.
///
/// The internal mutex serializes the encode/decode pair, so a client may
/// be shared across tasks; requests are simply processed one at a time.
pub struct TcpClient {
    codec: Mutex<Option<Box<dyn Codec>>>,
    msg_id: AtomicU64,
}

impl TcpClient {
    pub fn new() -> Self {
        Self {
            codec: Mutex::new(None),
            msg_id: AtomicU64::new(1),
        }
    }

    /// Dial `host:port` and set up the codec.
    pub async fn connect(&self, addr: &str, codec_name: &str) -> Result<()> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ReplError::Timeout(TransportConfig::CONNECT_TIMEOUT))??;
        // A codec construction failure drops (and thereby closes) the
        // freshly dialed stream.
        let codec = new_codec(codec_name, Box::new(stream))?;
        *self.codec.lock().await = Some(codec);
        Ok(())
    }

    /// Send code for evaluation and await the response.
    pub async fn eval(&self, code: &str) -> Result<EvalResult> {
        let mut guard = self.codec.lock().await;
        let codec = guard.as_mut().ok_or(ReplError::NotConnected)?;
        let msg_id = self.msg_id.fetch_add(1, Ordering::Relaxed);
        exchange(codec.as_mut(), msg_id, code).await
    }

    /// Close the codec and connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if let Some(mut codec) = self.codec.lock().await.take() {
            codec.close().await?;
        }
        Ok(())
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new()
    }
}
