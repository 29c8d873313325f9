//! Operation dispatch: turns a request message into a response message.
//!
//! The handler is stateless aside from the bound evaluator. It never
//! panics on malformed input; every failure mode becomes a structured
//! error response. The central convention: a Lisp evaluation error is a
//! datum in `value` with `status=["done"]`, while only protocol-level
//! failures (unknown op, missing field, unreadable file, catastrophic
//! evaluator failure) set `protocol_error` and `status=["error"]`.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::ProtocolConfig;
use crate::protocol::message::Message;

/// Boxed error for catastrophic evaluator failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a successful (possibly error-as-data) evaluation.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// The evaluation result, errors-as-data included.
    pub value: Value,
    /// Captured stdout/stderr.
    pub output: String,
}

/// The evaluator contract.
///
/// A pure function from source code to an [`Evaluation`]. The `Err` arm is
/// reserved for catastrophic failures inside the evaluator itself; an
/// ordinary Lisp runtime error comes back in `Evaluation::value`.
pub type EvaluatorFn = Arc<dyn Fn(&str) -> std::result::Result<Evaluation, BoxError> + Send + Sync>;

const UNIMPLEMENTED_OPS: &[&str] = &[
    "complete",
    "info",
    "eldoc",
    "lookup",
    "stdin",
    "ls-sessions",
    "clone",
    "close",
];

/// Stateless request dispatcher bound to an evaluator.
pub struct Handler {
    evaluator: EvaluatorFn,
}

impl Handler {
    pub fn new(evaluator: EvaluatorFn) -> Self {
        Self { evaluator }
    }

    /// Process one request and produce its response.
    ///
    /// The response always echoes the request's id.
    pub async fn handle(&self, req: &Message) -> Message {
        let resp = Message::reply_to(req);

        match req.op.as_str() {
            "eval" => self.handle_eval(req, resp),
            "load-file" => self.handle_load_file(req, resp).await,
            "describe" => Self::handle_describe(resp),
            "interrupt" => protocol_error(
                resp,
                "interrupt operation not yet fully implemented".to_string(),
            ),
            op if UNIMPLEMENTED_OPS.contains(&op) => {
                protocol_error(resp, format!("operation {op:?} not yet implemented"))
            }
            op => protocol_error(resp, format!("unknown operation: {op:?}")),
        }
    }

    fn handle_eval(&self, req: &Message, resp: Message) -> Message {
        if req.code.is_empty() {
            return protocol_error(resp, "eval operation requires 'code' field".to_string());
        }
        self.run_evaluator(&req.code, resp)
    }

    async fn handle_load_file(&self, req: &Message, resp: Message) -> Message {
        let path = req
            .data
            .get("file")
            .and_then(Value::as_str)
            .or_else(|| req.data.get("file-path").and_then(Value::as_str))
            .unwrap_or_default();

        if path.is_empty() {
            return protocol_error(
                resp,
                "load-file operation requires 'file' or 'file-path' in data field".to_string(),
            );
        }

        match tokio::fs::read_to_string(path).await {
            Ok(code) => self.run_evaluator(&code, resp),
            Err(err) => protocol_error(resp, format!("failed to read file: {err}")),
        }
    }

    fn handle_describe(mut resp: Message) -> Message {
        let capabilities = json!({
            "versions": {
                "engine": ProtocolConfig::ENGINE_VERSION,
                "protocol": ProtocolConfig::PROTOCOL_VERSION,
            },
            "ops": ["eval", "load-file", "describe", "interrupt"],
            "transports": ["in-process", "unix", "tcp"],
        });
        if let Value::Object(data) = capabilities {
            resp.data = data;
        }
        resp.status = vec!["done".to_string()];
        resp
    }

    fn run_evaluator(&self, code: &str, mut resp: Message) -> Message {
        match (self.evaluator)(code) {
            Ok(evaluation) => {
                resp.value = evaluation.value;
                resp.output = evaluation.output;
                resp.status = vec!["done".to_string()];
                resp
            }
            Err(err) => protocol_error(resp, format!("evaluator error: {err}")),
        }
    }
}

fn protocol_error(mut resp: Message, message: String) -> Message {
    resp.status = vec!["error".to_string()];
    resp.protocol_error = message;
    resp
}
