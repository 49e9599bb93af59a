//! Reconnecting WebSocket connection primitive.
//!
//! The supervisor's leaf dependency: "give me the next live connection,
//! retrying internally with backoff". Modeled as an explicit state machine
//! (disconnected -> connecting -> open) rather than an opaque stream of
//! connections, so callers see exactly where they are in the lifecycle.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};

use crate::config::MAX_FRAME_BYTES;

/// A live connection to the remote endpoint.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Open,
}

/// Acquires successive live connections to one endpoint, absorbing connect
/// failures internally with exponential backoff.
pub struct Connector {
    endpoint: String,
    state: ConnState,
    backoff: Duration,
    attempts: u64,
}

impl Connector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: ConnState::Disconnected,
            backoff: INITIAL_BACKOFF,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Obtain the next live connection, retrying on failure until one opens.
    ///
    /// Never returns an error: connect failures are logged and retried with
    /// exponential backoff. The backoff resets once a connection opens.
    pub async fn acquire(&mut self) -> WsStream {
        loop {
            self.state = ConnState::Connecting;
            self.attempts += 1;

            // Oversized inbound frames are rejected by the protocol layer
            // before they ever reach the relays.
            let ws_config = WebSocketConfig::default()
                .max_message_size(Some(MAX_FRAME_BYTES))
                .max_frame_size(Some(MAX_FRAME_BYTES));

            match connect_async_with_config(self.endpoint.as_str(), Some(ws_config), false).await {
                Ok((ws, _response)) => {
                    self.state = ConnState::Open;
                    self.backoff = INITIAL_BACKOFF;
                    return ws;
                }
                Err(e) => {
                    self.state = ConnState::Disconnected;
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempt = self.attempts,
                        error = %e,
                        retry_in_ms = self.backoff.as_millis() as u64,
                        "Connect failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    self.backoff = next_backoff(self.backoff);
                }
            }
        }
    }

    /// Record that the current connection ended. Resets backoff so the first
    /// reattempt after a live session is prompt.
    pub fn mark_disconnected(&mut self) {
        self.state = ConnState::Disconnected;
        self.backoff = INITIAL_BACKOFF;
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
