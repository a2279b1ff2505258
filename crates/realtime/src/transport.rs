//! The single persistent WebSocket channel to the realtime endpoint.
//!
//! One connection per session, established exactly once; there is no
//! reconnection logic. Callers that lose the connection construct a new
//! session. The writer and reader halves are split so the session can move
//! each into its own task while keeping exactly one consumer of the inbound
//! stream.

use crate::error::RealtimeError;
use crate::events::{ClientEvent, ServerEvent};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, client::IntoClientRequest, protocol::Message},
};
use tracing::{error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default realtime model when the caller does not specify one.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Builds the wss endpoint URL for a given model.
pub fn endpoint_url(model: &str) -> String {
    format!("wss://api.openai.com/v1/realtime?model={model}")
}

/// Establishes the one connection this session will ever hold.
///
/// Fails with [`RealtimeError::Connect`] if the endpoint is unreachable, auth
/// is rejected, or the handshake returns a non-success status. Callers must
/// not retry here.
pub async fn connect(
    url: &str,
    api_key: &SecretString,
) -> Result<(TransportWriter, TransportReader), RealtimeError> {
    let mut request = url.into_client_request().map_err(RealtimeError::Connect)?;
    let auth = format!("Bearer {}", api_key.expose_secret())
        .parse()
        .map_err(header_error)?;
    request.headers_mut().insert("Authorization", auth);
    let beta = "realtime=v1".parse().map_err(header_error)?;
    request.headers_mut().insert("OpenAI-Beta", beta);

    let (ws, _) = connect_async(request)
        .await
        .map_err(RealtimeError::Connect)?;
    info!("connected to realtime endpoint");

    let (sink, stream) = ws.split();
    Ok((
        TransportWriter { sink, open: true },
        TransportReader { stream },
    ))
}

fn header_error(e: tungstenite::http::header::InvalidHeaderValue) -> RealtimeError {
    RealtimeError::Connect(tungstenite::Error::HttpFormat(e.into()))
}

/// The outbound half: serializes client events in submission order.
pub struct TransportWriter {
    sink: SplitSink<WsStream, Message>,
    open: bool,
}

impl TransportWriter {
    /// Sends one event; fails if the connection is not open.
    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), RealtimeError> {
        if !self.open {
            return Err(RealtimeError::NotConnected);
        }
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                // Encoding failure is a local bug, not a transport fault;
                // drop the frame and keep the connection.
                error!(error = %e, "failed to encode outbound event, dropping it");
                return Ok(());
            }
        };
        self.sink
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| {
                self.open = false;
                RealtimeError::Transport(e)
            })
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.sink.close().await;
        }
    }
}

/// The inbound half: an ordered, lazy, finite sequence of server events that
/// terminates when the remote closes the connection. Exactly one consumer
/// exists, enforced by ownership.
pub struct TransportReader {
    stream: SplitStream<WsStream>,
}

impl TransportReader {
    /// Yields the next decoded event, or `None` once the connection is done.
    /// Malformed frames are logged and skipped, never fatal.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => return Some(event),
                    Err(e) => warn!(error = %e, "skipping malformed inbound event"),
                },
                Ok(Message::Close(_)) => {
                    info!("remote closed the connection");
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "transport receive failed");
                    return None;
                }
            }
        }
    }
}
