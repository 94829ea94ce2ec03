//! Interactive terminal over the session socket.
//!
//! The runner owns the pty; this side holds an opaque terminal session id and
//! gates input on a small state machine. Input is only transmitted while
//! `Connected`; everything else is rejected locally so keystrokes are never
//! silently dropped on the wire.

use std::fmt;
use std::sync::{Arc, Mutex};

use devex_protocol::terminal::{
    CloseTerminal, RequestTerminal, TerminalConnected, TerminalError, TerminalInput,
    TerminalResize,
};
use devex_protocol::ClientEvent;
use tokio::sync::broadcast;

use crate::error::ClientError;
use crate::session::{NoticeLevel, Session};
use crate::transport::ConnectionState;

/// Terminal sub-channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// No pty, or the previous one was torn down.
    Disconnected,
    /// `requestTerminal` sent, waiting for `terminalConnected`.
    Connecting,
    /// Live pty; input and resize are accepted.
    Connected,
    /// The runner reported a terminal failure; a new `request` is needed.
    Error,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

struct TermState {
    status: TerminalStatus,
    /// Kept across closes so a re-request can ask the runner to revive the
    /// previous pty.
    session_id: Option<String>,
}

pub struct TerminalHandle {
    session: Arc<Session>,
    state: Arc<Mutex<TermState>>,
    output_tx: broadcast::Sender<String>,
    status_tx: broadcast::Sender<TerminalStatus>,
}

fn set_status(
    state: &Arc<Mutex<TermState>>,
    status_tx: &broadcast::Sender<TerminalStatus>,
    status: TerminalStatus,
) {
    let mut st = state.lock().unwrap();
    if st.status == status {
        return;
    }
    st.status = status;
    let _ = status_tx.send(status);
}

impl TerminalHandle {
    pub fn new(session: Arc<Session>) -> Self {
        let state = Arc::new(Mutex::new(TermState {
            status: TerminalStatus::Disconnected,
            session_id: None,
        }));
        let (output_tx, _) = broadcast::channel(256);
        let (status_tx, _) = broadcast::channel(16);

        {
            let state = state.clone();
            let status_tx = status_tx.clone();
            session.on_payload::<TerminalConnected, _>("terminalConnected", move |payload| {
                state.lock().unwrap().session_id = Some(payload.session_id);
                set_status(&state, &status_tx, TerminalStatus::Connected);
            });
        }

        {
            let output_tx = output_tx.clone();
            session.on_payload::<String, _>("terminalResponse", move |chunk| {
                let _ = output_tx.send(chunk);
            });
        }

        {
            let weak = Arc::downgrade(&session);
            let state = state.clone();
            let status_tx = status_tx.clone();
            session.on_payload::<TerminalError, _>("terminalError", move |payload| {
                set_status(&state, &status_tx, TerminalStatus::Error);
                if let Some(session) = weak.upgrade() {
                    session.notify(
                        NoticeLevel::Warning,
                        format!("terminal error: {}", payload.error),
                    );
                }
            });
        }

        // Older runners send terminalClosed with no payload at all, so this
        // one is registered untyped.
        {
            let state = state.clone();
            let status_tx = status_tx.clone();
            session.on("terminalClosed", move |_payload| {
                set_status(&state, &status_tx, TerminalStatus::Disconnected);
            });
        }

        // Losing the socket loses the pty stream with it.
        {
            let state = state.clone();
            let status_tx = status_tx.clone();
            let mut transitions = session.transitions();
            tokio::spawn(async move {
                loop {
                    match transitions.recv().await {
                        Ok(ConnectionState::Closed) => {
                            set_status(&state, &status_tx, TerminalStatus::Disconnected);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            });
        }

        Self {
            session,
            state,
            output_tx,
            status_tx,
        }
    }

    /// Ask the runner for a pty. If a previous terminal session id is held it
    /// is offered for revival.
    pub fn request(&self) -> Result<(), ClientError> {
        let previous = self.state.lock().unwrap().session_id.clone();
        self.session
            .emit(&ClientEvent::RequestTerminal(RequestTerminal {
                session_id: previous,
            }))?;
        set_status(&self.state, &self.status_tx, TerminalStatus::Connecting);
        Ok(())
    }

    /// Send keystrokes to the pty.
    pub fn input(&self, data: &str) -> Result<(), ClientError> {
        let session_id = self.connected_id()?;
        self.session.emit(&ClientEvent::TerminalInput(TerminalInput {
            data: data.to_string(),
            session_id,
        }))
    }

    /// Propagate a viewport size change.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), ClientError> {
        let session_id = self.connected_id()?;
        self.session
            .emit(&ClientEvent::TerminalResize(TerminalResize {
                cols,
                rows,
                session_id,
            }))
    }

    /// Tear the pty down. No-op when nothing is connected.
    pub fn close(&self) -> Result<(), ClientError> {
        let id = {
            let st = self.state.lock().unwrap();
            (st.status == TerminalStatus::Connected)
                .then(|| st.session_id.clone())
                .flatten()
        };
        if let Some(session_id) = id {
            self.session
                .emit(&ClientEvent::CloseTerminal(CloseTerminal { session_id }))?;
        }
        set_status(&self.state, &self.status_tx, TerminalStatus::Disconnected);
        Ok(())
    }

    pub fn status(&self) -> TerminalStatus {
        self.state.lock().unwrap().status
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().unwrap().session_id.clone()
    }

    /// Raw pty output chunks, in arrival order.
    pub fn output(&self) -> broadcast::Receiver<String> {
        self.output_tx.subscribe()
    }

    pub fn status_updates(&self) -> broadcast::Receiver<TerminalStatus> {
        self.status_tx.subscribe()
    }

    fn connected_id(&self) -> Result<String, ClientError> {
        let st = self.state.lock().unwrap();
        if st.status != TerminalStatus::Connected {
            return Err(ClientError::TerminalNotConnected);
        }
        st.session_id
            .clone()
            .ok_or(ClientError::TerminalNotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflinePolicy;
    use crate::session::tests::offline_session;
    use devex_protocol::Envelope;
    use serde_json::json;

    fn terminal() -> (Arc<Session>, TerminalHandle) {
        let session = offline_session(OfflinePolicy::Queue);
        let term = TerminalHandle::new(session.clone());
        (session, term)
    }

    fn connect(session: &Arc<Session>, id: &str) {
        session.inject(&Envelope::new(
            "terminalConnected",
            json!({ "sessionId": id }),
        ));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (session, term) = terminal();
        assert_eq!(term.status(), TerminalStatus::Disconnected);

        term.request().unwrap();
        assert_eq!(term.status(), TerminalStatus::Connecting);

        connect(&session, "t1");
        assert_eq!(term.status(), TerminalStatus::Connected);
        assert_eq!(term.session_id().as_deref(), Some("t1"));

        term.input("ls\r").unwrap();
        let frames = session.offline_frames();
        let env = Envelope::decode(frames.last().unwrap()).unwrap();
        assert_eq!(env.event, "terminalInput");
        assert_eq!(env.data["sessionId"], "t1");

        session.inject(&Envelope::new("terminalClosed", json!({})));
        assert_eq!(term.status(), TerminalStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_closed_without_payload() {
        let (session, term) = terminal();
        term.request().unwrap();
        connect(&session, "t1");

        session.inject(&Envelope::new("terminalClosed", serde_json::Value::Null));
        assert_eq!(term.status(), TerminalStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_input_rejected_without_pty() {
        let (_session, term) = terminal();
        assert!(matches!(
            term.input("x"),
            Err(ClientError::TerminalNotConnected)
        ));
        assert!(matches!(
            term.resize(80, 24),
            Err(ClientError::TerminalNotConnected)
        ));
    }

    #[tokio::test]
    async fn test_error_blocks_input_until_reconnected() {
        let (session, term) = terminal();
        term.request().unwrap();
        connect(&session, "t1");

        session.inject(&Envelope::new(
            "terminalError",
            json!({ "error": "pty died" }),
        ));
        assert_eq!(term.status(), TerminalStatus::Error);
        assert!(matches!(
            term.input("x"),
            Err(ClientError::TerminalNotConnected)
        ));

        connect(&session, "t2");
        assert_eq!(term.status(), TerminalStatus::Connected);
        term.input("x").unwrap();
    }

    #[tokio::test]
    async fn test_rerequest_offers_previous_id() {
        let (session, term) = terminal();
        term.request().unwrap();
        connect(&session, "t1");
        session.inject(&Envelope::new("terminalClosed", json!({})));

        term.request().unwrap();
        let frames = session.offline_frames();
        let env = Envelope::decode(frames.last().unwrap()).unwrap();
        assert_eq!(env.event, "requestTerminal");
        assert_eq!(env.data["sessionId"], "t1");
    }

    #[tokio::test]
    async fn test_output_broadcast() {
        let (session, term) = terminal();
        let mut output = term.output();
        session.inject(&Envelope::new("terminalResponse", json!("hello\r\n")));
        assert_eq!(output.try_recv().unwrap(), "hello\r\n");
    }
}
