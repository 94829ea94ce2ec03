//! Wire protocol for the Devex sandbox session transport.
//!
//! This crate defines the message format spoken between a Devex IDE client and
//! a workspace runner over a single WebSocket connection:
//!
//! ```text
//! IDE client <--[WS: {event, data} envelopes]--> Workspace runner
//!                                                 (filesystem + pty)
//! ```
//!
//! Every frame on the wire is exactly one [`Envelope`]: a JSON object with an
//! `event` name and an event-specific `data` payload. The typed unions
//! [`ClientEvent`] and [`ServerEvent`] enumerate all events each side may send,
//! so payload shapes are enforced by the compiler rather than assumed at
//! runtime.
//!
//! ## Design Principles
//!
//! 1. **One envelope per frame.** The transport guarantees message atomicity;
//!    no partial-frame reassembly happens at this layer.
//! 2. **Requests carry correlation ids.** File operation requests include a
//!    monotonically increasing `id` which responses echo back, allowing
//!    concurrent operations on the same path. Peers that omit the id fall back
//!    to event-name correlation.
//! 3. **File edits travel as patches.** `updateContent` carries a serialized
//!    text diff against the last-synced content, not the full file.

pub mod envelope;
pub mod events;
pub mod files;
pub mod terminal;

pub use envelope::{Envelope, ProtocolError};
pub use events::{ClientEvent, ServerEvent};
pub use files::{parent_dir, DirEntry};
