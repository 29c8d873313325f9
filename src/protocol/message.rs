//! The protocol message record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A protocol message exchanged between client and server.
///
/// One record type carries both requests and responses. Every field has a
/// zero value that is omitted on the wire, and decoders tolerate any field
/// being absent, so the same schema can grow new operations without
/// breaking older peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Operation name (e.g. "eval", "load-file", "describe").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub op: String,

    /// Message identifier correlating a response with its request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Session identifier. Reserved; the in-process transport uses it to
    /// route responses back to the originating client.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,

    /// Source code to evaluate (for "eval").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,

    /// Status flags: "done", "error", "interrupted".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,

    /// Evaluation result, including evaluation errors shaped as data.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,

    /// Captured stdout/stderr produced during evaluation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,

    /// Protocol-level failure only: unknown operation, missing field,
    /// file read failure. Never an evaluation error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol_error: String,

    /// Operation-specific payload (file path for "load-file", capability
    /// map for "describe").
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Message {
    /// Create an empty response carrying the request's id.
    pub fn reply_to(req: &Message) -> Self {
        Self {
            id: req.id.clone(),
            ..Self::default()
        }
    }

    /// True when the first status tag is "error".
    pub fn is_error(&self) -> bool {
        self.status.first().map(String::as_str) == Some("error")
    }
}
