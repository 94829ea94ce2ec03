//! Client side of a Devex workspace session.
//!
//! A [`Session`] owns one WebSocket connection to a workspace runner and keeps
//! it alive across network failures with bounded exponential backoff. On top
//! of the session sit two surfaces:
//!
//! ```text
//!   FileWorkspace ----\
//!                      >-- Session -- Transport -- ws://runner/<id>/api/v1/repl/ws
//!   TerminalHandle ---/
//! ```
//!
//! * [`FileWorkspace`] mirrors the runner's file tree, syncs edits as text
//!   diffs, and drives the clipboard-based copy/cut/paste flow.
//! * [`TerminalHandle`] multiplexes interactive pty I/O over the same socket.
//!
//! All state mutation happens in response to runner events, never
//! optimistically on the request path, so the mirror can only ever lag the
//! runner, not diverge from it.

pub mod config;
pub mod error;
pub mod files;
pub mod router;
pub mod session;
pub mod terminal;
pub mod transport;

pub use devex_protocol::{ClientEvent, DirEntry, Envelope, ServerEvent};

pub use config::{OfflinePolicy, ReconnectConfig, SessionConfig};
pub use error::ClientError;
pub use files::{ClipboardEntry, ClipboardMode, FileWorkspace, FsUpdate, OpenFile};
pub use session::{Notice, NoticeLevel, Session};
pub use terminal::{TerminalHandle, TerminalStatus};
pub use transport::ConnectionState;
