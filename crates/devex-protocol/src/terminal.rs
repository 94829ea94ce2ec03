//! Terminal I/O payloads.
//!
//! The terminal sub-channel is correlated by an opaque session id assigned by
//! the runner in `terminalConnected`. All input and resize messages must carry
//! the current id; after `terminalError` or `terminalClosed` the held id is
//! stale and the client must wait for a fresh `terminalConnected` before
//! sending input again.

use serde::{Deserialize, Serialize};

/// `requestTerminal`: ask the runner to create (or re-create) a pty.
///
/// `session_id` is the previous id when reconnecting, absent otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestTerminal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `terminalConnected`: the runner created the pty and assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalConnected {
    pub session_id: String,
}

/// `terminalInput`: raw keystroke bytes, only valid while connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalInput {
    pub data: String,
    pub session_id: String,
}

/// `terminalResize`: viewport size change for the remote pty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalResize {
    pub cols: u16,
    pub rows: u16,
    pub session_id: String,
}

/// `terminalError`: the terminal sub-channel failed. The session itself stays
/// usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TerminalError {
    pub error: String,
}

/// `terminalClosed`: clean pty teardown. Older runners send this with no
/// payload at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalClosed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `closeTerminal`: client-initiated pty teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CloseTerminal {
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_terminal_without_previous_id() {
        let req = RequestTerminal::default();
        assert_eq!(serde_json::to_string(&req).unwrap(), "{}");
    }

    #[test]
    fn test_input_wire_format() {
        let input = TerminalInput {
            data: "ls\r".to_string(),
            session_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains("\"sessionId\":\"abc\""));
        assert!(json.contains("\"data\":\"ls\\r\""));
    }

    #[test]
    fn test_closed_without_payload() {
        let closed: TerminalClosed = serde_json::from_str("null").unwrap_or_default();
        assert!(closed.session_id.is_none());
    }
}
