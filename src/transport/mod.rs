//! Message transports: in-process queues, unix sockets, and TCP.
//!
//! The socket transports share one per-connection loop (decode, handle,
//! encode) and one connection tracker; they differ only in the listen and
//! dial primitives. The in-process transport skips serialization entirely
//! and moves messages over typed queues.

pub mod inprocess;
pub mod tcp;
pub mod unix;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::error::{ReplError, Result};
use crate::ops::Handler;
use crate::protocol::codec::{new_codec, Codec};
use crate::protocol::message::Message;

/// Outcome of a client `eval` call.
///
/// Carries the response fields a REPL front-end consumes. An evaluation
/// error arrives in `value` with `status=["done"]`; see the crate docs.
#[derive(Debug, Clone, Default)]
pub struct EvalResult {
    /// Message id correlating with the request.
    pub id: String,
    /// Evaluation result, errors-as-data included.
    pub value: Value,
    /// Captured stdout/stderr.
    pub output: String,
    /// Status flags ("done", "error", "interrupted").
    pub status: Vec<String>,
}

impl From<Message> for EvalResult {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            value: msg.value,
            output: msg.output,
            status: msg.status,
        }
    }
}

/// Bookkeeping for live connections and their tasks.
///
/// The accept loop registers a connection before spawning its task; the
/// task deregisters itself on exit. `wait_idle` is the completion tracker
/// the stop path blocks on.
pub(crate) struct ConnTracker {
    conns: Mutex<HashSet<u64>>,
    active: AtomicUsize,
    idle: Notify,
    next_id: AtomicU64,
}

impl ConnTracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            conns: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            idle: Notify::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.conns.lock().unwrap().insert(id);
        self.active.fetch_add(1, Ordering::SeqCst);
        id
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.conns.lock().unwrap().remove(&id);
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Number of currently live connections.
    pub(crate) fn live(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    /// Wait until every registered connection task has exited.
    pub(crate) async fn wait_idle(&self) {
        loop {
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.idle.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Serve one accepted connection until the peer disconnects, a codec
/// failure occurs, or shutdown is signalled.
pub(crate) async fn serve_connection<S>(
    stream: S,
    codec_name: String,
    handler: Arc<Handler>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut codec = match new_codec(&codec_name, Box::new(stream)) {
        Ok(codec) => codec,
        Err(err) => {
            warn!("failed to create {codec_name} codec for connection: {err}");
            return;
        }
    };

    loop {
        let req = tokio::select! {
            decoded = codec.decode() => match decoded {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(err) => {
                    debug!("connection read failed: {err}");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        };

        let resp = handler.handle(&req).await;

        if let Err(err) = codec.encode(&resp).await {
            debug!("connection write failed: {err}");
            break;
        }
    }

    let _ = codec.close().await;
}

/// One request/response exchange over a codec: encode an `eval` request,
/// decode exactly one response.
///
/// Callers hold their client mutex across this call so the decode always
/// pairs with its preceding encode.
pub(crate) async fn exchange(codec: &mut dyn Codec, id: u64, code: &str) -> Result<EvalResult> {
    let req = Message {
        op: "eval".to_string(),
        id: id.to_string(),
        code: code.to_string(),
        ..Message::default()
    };
    codec.encode(&req).await?;
    match codec.decode().await? {
        Some(resp) => Ok(EvalResult::from(resp)),
        None => Err(ReplError::ConnectionClosed),
    }
}
