//! WebSocket transport with automatic reconnection.
//!
//! The transport owns the socket exclusively. It pumps outbound frames from
//! the session's queue and routes inbound frames through the
//! [`EventRouter`](crate::router::EventRouter). When the connection drops it
//! reconnects with exponential backoff and jitter; the session layer is told
//! about every state transition and every successful open so it can flush
//! buffered frames and resynchronize.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use devex_protocol::Envelope;
use futures::{SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ReconnectConfig;
use crate::router::EventRouter;
use crate::session::{publish_notice, Notice, NoticeLevel};

/// Connection lifecycle state, observable through [`Session::state`].
///
/// [`Session::state`]: crate::session::Session::state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Delay before reconnect attempt `attempt` (zero-based): exponential growth
/// plus up to 20% jitter to avoid thundering-herd reconnects against a
/// recovering runner. `max_backoff_ms` caps the final delay, jitter included.
pub(crate) fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exp = attempt.min(10);
    let base = config.base_backoff_ms.saturating_mul(1u64 << exp);
    let jitter = (base as f64 * 0.2 * rand::random::<f64>()) as u64;
    Duration::from_millis(base.saturating_add(jitter).min(config.max_backoff_ms))
}

enum PumpExit {
    /// The session handle was dropped; stop for good.
    SessionDropped,
    /// The runner closed the socket or the stream ended.
    PeerClosed,
    /// A read or write error tore the connection down.
    Failed,
}

pub(crate) struct Transport {
    pub(crate) url: String,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) outbound_rx: mpsc::Receiver<String>,
    pub(crate) router: Arc<EventRouter>,
    pub(crate) state_tx: Arc<watch::Sender<ConnectionState>>,
    pub(crate) transitions_tx: broadcast::Sender<ConnectionState>,
    pub(crate) notices_tx: broadcast::Sender<Notice>,
    /// Signals the session loop after every successful open.
    pub(crate) opened_tx: mpsc::Sender<()>,
}

impl Transport {
    /// Drive the connection until the session is dropped or reconnection is
    /// exhausted.
    pub(crate) async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                if attempt > self.reconnect.max_attempts {
                    error!(
                        "giving up after {} reconnect attempts",
                        self.reconnect.max_attempts
                    );
                    publish_notice(
                        &self.notices_tx,
                        NoticeLevel::Error,
                        "connection lost and could not be re-established",
                    );
                    self.set_state(ConnectionState::Closed);
                    return;
                }
                let delay = backoff_delay(&self.reconnect, attempt - 1);
                debug!("reconnect attempt {attempt} in {delay:?}");
                tokio::time::sleep(delay).await;
            }

            self.set_state(ConnectionState::Connecting);
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Open);
                    let _ = self.opened_tx.send(()).await;
                    match self.pump(ws).await {
                        PumpExit::SessionDropped => {
                            self.set_state(ConnectionState::Closed);
                            return;
                        }
                        PumpExit::PeerClosed | PumpExit::Failed => {
                            self.set_state(ConnectionState::Closed);
                            publish_notice(
                                &self.notices_tx,
                                NoticeLevel::Warning,
                                "connection to workspace runner lost, reconnecting",
                            );
                            attempt = 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("failed to connect to {}: {e}", self.url);
                    self.set_state(ConnectionState::Closed);
                    attempt += 1;
                }
            }
        }
    }

    async fn pump(&mut self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> PumpExit {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                frame = self.outbound_rx.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!("failed to send frame: {e}");
                            return PumpExit::Failed;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return PumpExit::SessionDropped;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => match Envelope::decode(text.as_str()) {
                        Ok(envelope) => self.router.dispatch(&envelope),
                        // A malformed frame is dropped, never fatal.
                        Err(e) => warn!("dropping malformed frame: {e}"),
                    },
                    Some(Ok(Message::Close(_))) | None => return PumpExit::PeerClosed,
                    Some(Ok(other)) => debug!("ignoring non-text frame: {other:?}"),
                    Some(Err(e)) => {
                        warn!("websocket read error: {e}");
                        return PumpExit::Failed;
                    }
                },
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = *self.state_tx.borrow();
        if prev == next {
            return;
        }
        debug!("connection state: {prev} -> {next}");
        self.state_tx.send_replace(next);
        let _ = self.transitions_tx.send(next);
    }
}
