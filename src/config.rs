//! Centralized configuration constants for the protocol engine.

use std::time::Duration;

/// Protocol-level configuration.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Version of the wire protocol, reported by `describe`.
    pub const PROTOCOL_VERSION: &'static str = "0.1.0";

    /// Version of the engine itself, reported by `describe`.
    pub const ENGINE_VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Codec used when a configuration or address leaves it unspecified.
    pub const DEFAULT_CODEC: &'static str = "json";

    /// Upper bound for a single wire record. Safety valve against a
    /// misbehaving peer streaming an unterminated record.
    pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;
}

/// Transport-level configuration.
pub struct TransportConfig;

impl TransportConfig {
    /// In-process server request queue capacity.
    pub const REQUEST_QUEUE_CAPACITY: usize = 100;

    /// Per-client in-process response queue capacity.
    pub const RESPONSE_QUEUE_CAPACITY: usize = 10;

    /// Socket dial timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default grace period for server shutdown.
    pub const STOP_GRACE: Duration = Duration::from_secs(5);
}
