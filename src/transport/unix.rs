//! Unix-domain socket transport: filesystem socket server and client.
//!
//! Structurally the TCP transport with a filesystem path in place of
//! `host:port`. The server removes a stale socket file left behind by a
//! previous process before binding, and cleans its own up on stop.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::{ReplError, Result};
use crate::ops::{EvaluatorFn, Handler};
use crate::protocol::codec::{new_codec, Codec};
use crate::transport::{exchange, serve_connection, ConnTracker, EvalResult};

/// Unix-domain socket REPL server.
pub struct UnixServer {
    path: String,
    codec_name: String,
    handler: Arc<Handler>,
    shutdown: watch::Sender<bool>,
    tracker: Arc<ConnTracker>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl UnixServer {
    pub fn new(
        path: impl Into<String>,
        codec_name: impl Into<String>,
        evaluator: EvaluatorFn,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            path: path.into(),
            codec_name: codec_name.into(),
            handler: Arc::new(Handler::new(evaluator)),
            shutdown,
            tracker: ConnTracker::new(),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind the socket path, launch the accept loop, and block until
    /// shutdown is requested.
    pub async fn start(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(ReplError::ServerStopped);
        }
        if Path::new(&self.path).exists() {
            if let Err(err) = std::fs::remove_file(&self.path) {
                warn!("failed to remove stale socket {}: {err}", self.path);
            }
        }

        let listener = UnixListener::bind(&self.path)?;
        info!("unix repl server listening on {}", self.path);

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

    /// Gracefully shut down: stop accepting, close live connections, wait
    /// for every task bounded by `grace`, and remove the socket file.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let _ = self.shutdown.send(true);

        let accept_task = self.accept_task.lock().await.take();
        let drained = async {
            if let Some(task) = accept_task {
                let _ = task.await;
            }
            self.tracker.wait_idle().await;
        };
        let waited = tokio::time::timeout(grace, drained).await;

        let _ = std::fs::remove_file(&self.path);
        waited.map_err(|_| ReplError::Timeout(grace))?;
        Ok(())
    }

    /// The socket path.
    pub fn addr(&self) -> String {
        self.path.clone()
    }

    /// Number of currently live connections.
    pub fn live_connections(&self) -> usize {
        self.tracker.live()
    }
}

async fn accept_loop(
    listener: UnixListener,
    codec_name: String,
    handler: Arc<Handler>,
    tracker: Arc<ConnTracker>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    debug!("accepted unix socket connection");
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
                    error!("unix socket accept error: {err}");
                }
            }
        }
    }
}

/// Unix-domain socket REPL client.
pub struct UnixClient {
    codec: Mutex<Option<Box<dyn Codec>>>,
    msg_id: AtomicU64,
}

impl UnixClient {
    pub fn new() -> Self {
        Self {
            codec: Mutex::new(None),
            msg_id: AtomicU64::new(1),
        }
    }

    /// Dial the socket path and set up the codec.
    pub async fn connect(&self, path: &str, codec_name: &str) -> Result<()> {
        let stream =
            tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, UnixStream::connect(path))
                .await
                .map_err(|_| ReplError::Timeout(TransportConfig::CONNECT_TIMEOUT))??;
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

impl Default for UnixClient {
    fn default() -> Self {
        Self::new()
    }
}
