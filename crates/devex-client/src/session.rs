//! Session lifecycle and the emit/on surface.
//!
//! A [`Session`] is the owning handle for one workspace connection. Dropping
//! it (or calling [`Session::close`]) tears down the transport and all
//! registered handlers; nothing about the connection is global.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devex_protocol::{ClientEvent, ProtocolError};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{OfflinePolicy, SessionConfig};
use crate::error::ClientError;
use crate::router::{EventRouter, Handler};
use crate::transport::{ConnectionState, Transport};

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing message about session health, suitable for a status bar or
/// toast. Every notice is also written to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

pub(crate) fn publish_notice(
    tx: &broadcast::Sender<Notice>,
    level: NoticeLevel,
    message: impl Into<String>,
) {
    let message = message.into();
    match level {
        NoticeLevel::Info => info!("{message}"),
        NoticeLevel::Warning => warn!("{message}"),
        NoticeLevel::Error => error!("{message}"),
    }
    let _ = tx.send(Notice { level, message });
}

/// One live connection to a workspace runner.
pub struct Session {
    workspace_id: String,
    config: SessionConfig,
    router: Arc<EventRouter>,
    outbound_tx: mpsc::Sender<String>,
    offline: Arc<Mutex<VecDeque<String>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    transitions_tx: broadcast::Sender<ConnectionState>,
    notices_tx: broadcast::Sender<Notice>,
    next_request_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Session {
    /// Open a session to the workspace. Connection establishment happens in
    /// the background; frames emitted before the socket opens follow the
    /// configured [`OfflinePolicy`].
    pub fn connect(config: SessionConfig, workspace_id: impl Into<String>) -> Arc<Self> {
        let workspace_id = workspace_id.into();
        let url = config.ws_url(&workspace_id);

        let router = Arc::new(EventRouter::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue);
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (transitions_tx, _) = broadcast::channel(16);
        let (notices_tx, _) = broadcast::channel(32);
        let (opened_tx, mut opened_rx) = mpsc::channel(1);
        let offline = Arc::new(Mutex::new(VecDeque::new()));

        let transport = Transport {
            url,
            reconnect: config.reconnect.clone(),
            outbound_rx,
            router: router.clone(),
            state_tx: state_tx.clone(),
            transitions_tx: transitions_tx.clone(),
            notices_tx: notices_tx.clone(),
            opened_tx,
        };
        let transport_task = tokio::spawn(transport.run());

        // On every open: handshake first, then flush whatever was buffered
        // while offline.
        let open_task = {
            let outbound_tx = outbound_tx.clone();
            let offline = offline.clone();
            tokio::spawn(async move {
                while opened_rx.recv().await.is_some() {
                    if let Ok(frame) = ClientEvent::Connection.encode() {
                        let _ = outbound_tx.send(frame).await;
                    }
                    let buffered: Vec<String> = offline.lock().unwrap().drain(..).collect();
                    for frame in buffered {
                        let _ = outbound_tx.send(frame).await;
                    }
                }
            })
        };

        Arc::new(Self {
            workspace_id,
            config,
            router,
            outbound_tx,
            offline,
            state_tx,
            transitions_tx,
            notices_tx,
            next_request_id: AtomicU64::new(0),
            tasks: Mutex::new(vec![transport_task, open_task]),
            closed: AtomicBool::new(false),
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Open
    }

    /// Current state plus change notifications.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Every state transition, in order. Used by the surfaces to react to
    /// reopen and loss events.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions_tx.subscribe()
    }

    /// User-facing session health messages.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    /// Allocate a fresh correlation id. Ids are unique per session.
    pub fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Queue one event for transmission.
    pub fn emit(&self, event: &ClientEvent) -> Result<(), ClientError> {
        self.send_frame(event.encode()?)
    }

    fn send_frame(&self, frame: String) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::SessionClosed);
        }
        if self.is_connected() {
            return self.outbound_tx.try_send(frame).map_err(|e| match e {
                TrySendError::Full(_) => ClientError::QueueFull,
                TrySendError::Closed(_) => ClientError::SessionClosed,
            });
        }
        match self.config.offline_policy {
            OfflinePolicy::Queue => {
                let mut offline = self.offline.lock().unwrap();
                if offline.len() >= self.config.offline_queue {
                    offline.pop_front();
                    warn!("offline buffer full, dropping oldest frame");
                }
                offline.push_back(frame);
                Ok(())
            }
            OfflinePolicy::FailFast => Err(ClientError::NotConnected),
        }
    }

    /// Register a handler for an event's raw payload.
    pub fn on(&self, event: impl Into<String>, handler: impl Fn(Value) + Send + Sync + 'static) {
        self.router.on(event, Arc::new(handler) as Handler);
    }

    /// Register a handler for an event's typed payload. Payloads that fail to
    /// deserialize are logged and dropped.
    pub fn on_payload<T, F>(&self, event: impl Into<String>, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let event = event.into();
        let name = event.clone();
        self.on(event, move |value| {
            match serde_json::from_value::<T>(value) {
                Ok(payload) => handler(payload),
                Err(e) => warn!("malformed '{name}' payload: {e}"),
            }
        });
    }

    /// Remove all handlers for an event.
    pub fn off(&self, event: &str) {
        self.router.off(event);
    }

    /// Emit a request and await the correlated response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        event: &ClientEvent,
        response_event: &str,
        id: u64,
    ) -> Result<T, ClientError> {
        let rx = self.router.wait_for(response_event, id);
        if let Err(e) = self.emit(event) {
            self.router.forget(response_event, id);
            return Err(e);
        }
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => serde_json::from_value(value)
                .map_err(|e| ClientError::Protocol(ProtocolError::Decode(e))),
            Ok(Err(_)) => Err(ClientError::SessionClosed),
            Err(_) => {
                self.router.forget(response_event, id);
                Err(ClientError::Timeout)
            }
        }
    }

    pub(crate) fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub(crate) fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        publish_notice(&self.notices_tx, level, message);
    }

    /// Tear the session down. Idempotent; also invoked by `Drop`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.state_tx.send_replace(ConnectionState::Closed);
        let _ = self.transitions_tx.send(ConnectionState::Closed);
        self.router.clear();
    }

    #[cfg(test)]
    pub(crate) fn offline_frames(&self) -> Vec<String> {
        self.offline.lock().unwrap().iter().cloned().collect()
    }

    /// Feed one envelope through the router as if it arrived on the socket.
    #[cfg(test)]
    pub(crate) fn inject(&self, envelope: &devex_protocol::Envelope) {
        self.router.dispatch(envelope);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
