//! Client-side error types.

use devex_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by session, file, and terminal operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The session is offline and the configured policy forbids queueing.
    #[error("not connected to the workspace runner")]
    NotConnected,

    /// The outbound queue is full; the caller should back off.
    #[error("outbound queue is full")]
    QueueFull,

    /// Terminal input or resize was attempted without a live pty.
    #[error("terminal is not connected")]
    TerminalNotConnected,

    /// Paste was attempted with nothing on the clipboard.
    #[error("clipboard is empty")]
    ClipboardEmpty,

    /// A save was attempted with no file open.
    #[error("no file is open")]
    NoOpenFile,

    /// The runner answered the request with an error.
    #[error("runner reported error: {0}")]
    Remote(String),

    /// No response arrived within the configured request timeout.
    #[error("request timed out")]
    Timeout,

    /// The session has been closed and will not reconnect.
    #[error("session is closed")]
    SessionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
