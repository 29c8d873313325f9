//! In-process transport: server and clients in one address space.
//!
//! Messages cross the boundary as owned values over typed queues; no codec
//! is involved. The server is modeled as a message pump — one bounded
//! request queue drained by a single processing task, one bounded response
//! queue per registered client — so its semantics line up with the socket
//! transports instead of collapsing into a direct call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{ReplError, Result};
use crate::ops::{EvaluatorFn, Handler};
use crate::protocol::message::Message;
use crate::transport::EvalResult;

static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

type ClientRegistry = Arc<RwLock<HashMap<String, mpsc::Sender<Message>>>>;

/// In-process REPL server.
///
/// Hosts any number of [`InProcessClient`]s within the same process.
pub struct InProcessServer {
    handler: Arc<Handler>,
    requests_tx: mpsc::Sender<Message>,
    requests_rx: std::sync::Mutex<Option<mpsc::Receiver<Message>>>,
    clients: ClientRegistry,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InProcessServer {
    pub fn new(evaluator: EvaluatorFn) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(TransportConfig::REQUEST_QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            handler: Arc::new(Handler::new(evaluator)),
            requests_tx,
            requests_rx: std::sync::Mutex::new(Some(requests_rx)),
            clients: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Start the processing task and block until shutdown is requested.
    pub async fn start(&self) -> Result<()> {
        let requests_rx = self
            .requests_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(ReplError::AlreadyStarted)?;

        let task = tokio::spawn(process_requests(
            requests_rx,
            self.handler.clone(),
            self.clients.clone(),
            self.shutdown.subscribe(),
        ));
        *self.task.lock().await = Some(task);

        let mut shutdown_rx = self.shutdown.subscribe();
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Gracefully shut down: close every client queue, drop the registry,
    /// and wait for the processing task bounded by `grace`.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.clients.write().await.clear();

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            tokio::time::timeout(grace, task)
                .await
                .map_err(|_| ReplError::Timeout(grace))?
                .ok();
        }
        Ok(())
    }

    /// The transport's address tag.
    pub fn addr(&self) -> String {
        "in-process".to_string()
    }

    async fn register_client(&self, client_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(TransportConfig::RESPONSE_QUEUE_CAPACITY);
        self.clients.write().await.insert(client_id.to_string(), tx);
        rx
    }

    async fn unregister_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
    }

    async fn send_request(&self, req: Message) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(ReplError::ServerStopped);
        }
        self.requests_tx
            .send(req)
            .await
            .map_err(|_| ReplError::ServerStopped)
    }
}

/// Drain the request queue, invoke the handler, and route each response
/// to the queue named by the request's session.
async fn process_requests(
    mut requests: mpsc::Receiver<Message>,
    handler: Arc<Handler>,
    clients: ClientRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let req = tokio::select! {
            _ = shutdown.changed() => break,
            req = requests.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };

        // The session field names the originating client here. Requests
        // without one cannot be routed back and are dropped.
        if req.session.is_empty() {
            debug!("dropping in-process request without session id");
            continue;
        }

        let resp = handler.handle(&req).await;

        let tx = clients.read().await.get(&req.session).cloned();
        if let Some(tx) = tx {
            tokio::select! {
                _ = shutdown.changed() => break,
                sent = tx.send(resp) => {
                    if sent.is_err() {
                        debug!("response queue for {} closed", req.session);
                    }
                }
            }
        }
    }
}

/// In-process REPL client.
///
/// Each client gets a process-unique id and its own response queue on
/// connect. `eval` posts one request and awaits one response; wrapping the
/// call in `tokio::time::timeout` gives it a deadline, in which case the
/// pending response is abandoned rather than drained.
pub struct InProcessClient {
    server: Option<Arc<InProcessServer>>,
    responses: Mutex<Option<mpsc::Receiver<Message>>>,
    client_id: String,
    msg_id: AtomicU64,
}

impl InProcessClient {
    pub fn new() -> Self {
        let id = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            server: None,
            responses: Mutex::new(None),
            client_id: format!("client-{id}"),
            msg_id: AtomicU64::new(1),
        }
    }

    /// Register with an in-process server.
    pub async fn connect(&mut self, server: &Arc<InProcessServer>) -> Result<()> {
        let responses = server.register_client(&self.client_id).await;
        *self.responses.lock().await = Some(responses);
        self.server = Some(server.clone());
        Ok(())
    }

    /// Send code for evaluation and await the response.
    pub async fn eval(&self, code: &str) -> Result<EvalResult> {
        let server = self.server.as_ref().ok_or(ReplError::NotConnected)?;
        let msg_id = self.msg_id.fetch_add(1, Ordering::Relaxed);

        let req = Message {
            op: "eval".to_string(),
            id: msg_id.to_string(),
            session: self.client_id.clone(),
            code: code.to_string(),
            ..Message::default()
        };
        server.send_request(req).await?;

        let mut responses = self.responses.lock().await;
        let rx = responses.as_mut().ok_or(ReplError::NotConnected)?;
        match rx.recv().await {
            Some(resp) => Ok(EvalResult::from(resp)),
            None => Err(ReplError::ServerStopped),
        }
    }

    /// Unregister from the server. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(server) = self.server.take() {
            server.unregister_client(&self.client_id).await;
        }
        *self.responses.lock().await = None;
        Ok(())
    }

    /// The generated client id, used as the session tag on requests.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Default for InProcessClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use crate::ops::Evaluation;

    fn mock_evaluator() -> EvaluatorFn {
        Arc::new(|code: &str| match code {
            "(+ 1 2)" => Ok(Evaluation {
                value: json!(3),
                output: String::new(),
            }),
            "(println \"hello\")" => Ok(Evaluation {
                value: Value::Null,
                output: "hello\n".to_string(),
            }),
            "(error \"test error\")" => Ok(Evaluation {
                value: json!({"error": "test error", "type": "user-error"}),
                output: String::new(),
            }),
            other => Ok(Evaluation {
                value: json!(other),
                output: String::new(),
            }),
        })
    }

    async fn started_server(evaluator: EvaluatorFn) -> Arc<InProcessServer> {
        let server = Arc::new(InProcessServer::new(evaluator));
        let runner = server.clone();
        tokio::spawn(async move {
            let _ = runner.start().await;
        });
        tokio::task::yield_now().await;
        server
    }

    #[tokio::test]
    async fn eval_roundtrip() {
        let server = started_server(mock_evaluator()).await;
        let mut client = InProcessClient::new();
        client.connect(&server).await.unwrap();

        let result = client.eval("(+ 1 2)").await.unwrap();
        assert_eq!(result.value, json!(3));
        assert_eq!(result.status, vec!["done"]);

        client.close().await.unwrap();
        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn eval_carries_output() {
        let server = started_server(mock_evaluator()).await;
        let mut client = InProcessClient::new();
        client.connect(&server).await.unwrap();

        let result = client.eval("(println \"hello\")").await.unwrap();
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.status, vec!["done"]);

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn evaluation_error_comes_back_as_data() {
        let server = started_server(mock_evaluator()).await;
        let mut client = InProcessClient::new();
        client.connect(&server).await.unwrap();

        let result = client.eval("(error \"test error\")").await.unwrap();
        assert_eq!(result.status, vec!["done"]);
        assert_eq!(result.value["error"], json!("test error"));

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn message_ids_are_monotonic_per_client() {
        let server = started_server(mock_evaluator()).await;
        let mut client = InProcessClient::new();
        client.connect(&server).await.unwrap();

        for expected in 1..=3u64 {
            let result = client.eval("(+ 1 2)").await.unwrap();
            assert_eq!(result.id, expected.to_string());
        }

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_clients_each_get_their_response() {
        let server = started_server(mock_evaluator()).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                let mut client = InProcessClient::new();
                client.connect(&server).await.unwrap();
                let result = client.eval("(+ 1 2)").await.unwrap();
                client.close().await.unwrap();
                result
            }));
        }

        for handle in handles {
            let result = tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("timed out waiting for eval")
                .unwrap();
            assert_eq!(result.value, json!(3));
        }

        server.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn eval_deadline_abandons_pending_response() {
        let slow: EvaluatorFn = Arc::new(|_code: &str| {
            std::thread::sleep(Duration::from_secs(2));
            Ok(Evaluation {
                value: json!("slow"),
                output: String::new(),
            })
        });
        let server = started_server(slow).await;
        let mut client = InProcessClient::new();
        client.connect(&server).await.unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), client.eval("(+ 1 2)")).await;
        assert!(outcome.is_err(), "expected deadline to be exceeded");

        // The server is still usable: a fresh client eventually gets an
        // answer once the slow evaluation drains.
        let mut second = InProcessClient::new();
        second.connect(&server).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), second.eval("(+ 1 2)"))
            .await
            .expect("server did not recover")
            .unwrap();
        assert_eq!(result.value, json!("slow"));

        server.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn eval_after_stop_is_a_transport_error() {
        let server = started_server(mock_evaluator()).await;
        let mut client = InProcessClient::new();
        client.connect(&server).await.unwrap();

        server.stop(Duration::from_secs(1)).await.unwrap();

        let err = client.eval("(+ 1 2)").await.unwrap_err();
        assert!(matches!(err, ReplError::ServerStopped));
    }

    #[tokio::test]
    async fn eval_without_connect_is_not_connected() {
        let client = InProcessClient::new();
        let err = client.eval("(+ 1 2)").await.unwrap_err();
        assert!(matches!(err, ReplError::NotConnected));
    }

    #[tokio::test]
    async fn client_ids_are_unique() {
        let a = InProcessClient::new();
        let b = InProcessClient::new();
        assert_ne!(a.client_id(), b.client_id());
        assert!(a.client_id().starts_with("client-"));
    }

    #[tokio::test]
    async fn starting_twice_fails() {
        let server = started_server(mock_evaluator()).await;
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ReplError::AlreadyStarted));
        server.stop(Duration::from_secs(1)).await.unwrap();
    }
}
