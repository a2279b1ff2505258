//! Error types for the realtime session engine.
//!
//! Only failures that cross the crate's API boundary live here. Recoverable
//! protocol conditions (malformed inbound events, server-side response
//! conflicts, response timeouts, failing tool handlers) are absorbed by the
//! session state machine and surface through logs instead.

use tokio_tungstenite::tungstenite;

/// A failure reported by the realtime session engine.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// The WebSocket handshake failed: endpoint unreachable, auth rejected,
    /// or a non-success handshake status. Fatal for the session; the caller
    /// must construct a new one. No retries happen inside this crate.
    #[error("failed to connect to realtime endpoint: {0}")]
    Connect(#[source] tungstenite::Error),

    /// A send was attempted on a connection that is no longer open.
    #[error("transport is not connected")]
    NotConnected,

    /// The open connection failed mid-session while transmitting.
    #[error("transport send failed: {0}")]
    Transport(#[source] tungstenite::Error),

    /// An audio device could not be opened or configured. Non-fatal: the
    /// session continues in text-only mode without capture or playback.
    #[error("audio device unavailable: {0}")]
    Device(String),
}
