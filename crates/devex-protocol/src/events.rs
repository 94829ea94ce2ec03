//! The typed event unions for both directions of the channel.
//!
//! These enums serialize directly to the `{event, data}` envelope shape via
//! adjacent tagging, so `serde_json::to_string(&event)` produces exactly one
//! wire frame. Event names match the runner contract verbatim (mixed casing
//! included).

use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, ProtocolError};
use crate::files::{
    CopyRequest, CreatePathRequest, CutRequest, DeleteRequest, FetchContentRequest,
    FetchContentResponse, FetchDirRequest, FetchDirResponse, Loaded, PasteRequest, PasteResponse,
    PathResponse, RenameRequest, RenameResponse, RunnerError, TransferResponse,
    UpdateContentRequest, UpdateContentResponse,
};
use crate::terminal::{
    CloseTerminal, RequestTerminal, TerminalClosed, TerminalConnected, TerminalError,
    TerminalInput, TerminalResize,
};

/// All events the client may send to the workspace runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Workspace handshake; the runner answers with `Loaded`.
    #[serde(rename = "Connection")]
    Connection,

    // -- File operations --
    #[serde(rename = "fetchDir")]
    FetchDir(FetchDirRequest),
    #[serde(rename = "fetchContent")]
    FetchContent(FetchContentRequest),
    #[serde(rename = "updateContent")]
    UpdateContent(UpdateContentRequest),
    #[serde(rename = "createFile")]
    CreateFile(CreatePathRequest),
    #[serde(rename = "createFolder")]
    CreateFolder(CreatePathRequest),
    #[serde(rename = "delete")]
    Delete(DeleteRequest),
    #[serde(rename = "rename")]
    Rename(RenameRequest),
    #[serde(rename = "copy")]
    Copy(CopyRequest),
    #[serde(rename = "cut")]
    Cut(CutRequest),
    #[serde(rename = "paste")]
    Paste(PasteRequest),

    // -- Terminal --
    #[serde(rename = "requestTerminal")]
    RequestTerminal(RequestTerminal),
    #[serde(rename = "terminalInput")]
    TerminalInput(TerminalInput),
    #[serde(rename = "terminalResize")]
    TerminalResize(TerminalResize),
    #[serde(rename = "closeTerminal")]
    CloseTerminal(CloseTerminal),
}

impl ClientEvent {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connection => "Connection",
            Self::FetchDir(_) => "fetchDir",
            Self::FetchContent(_) => "fetchContent",
            Self::UpdateContent(_) => "updateContent",
            Self::CreateFile(_) => "createFile",
            Self::CreateFolder(_) => "createFolder",
            Self::Delete(_) => "delete",
            Self::Rename(_) => "rename",
            Self::Copy(_) => "copy",
            Self::Cut(_) => "cut",
            Self::Paste(_) => "paste",
            Self::RequestTerminal(_) => "requestTerminal",
            Self::TerminalInput(_) => "terminalInput",
            Self::TerminalResize(_) => "terminalResize",
            Self::CloseTerminal(_) => "closeTerminal",
        }
    }

    /// Serialize to a single wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a received envelope into a typed client event.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(envelope).map_err(ProtocolError::Decode)?;
        serde_json::from_value(value).map_err(ProtocolError::Decode)
    }
}

/// All events the workspace runner may send to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Reply to the `Connection` handshake with the root listing.
    #[serde(rename = "Loaded")]
    Loaded(Loaded),
    /// Broadcast error outside any request/response pair.
    #[serde(rename = "error")]
    Error(RunnerError),

    // -- File operation responses --
    #[serde(rename = "fetchDirResponse")]
    FetchDirResponse(FetchDirResponse),
    #[serde(rename = "fetchContentResponse")]
    FetchContentResponse(FetchContentResponse),
    #[serde(rename = "updateContentResponse")]
    UpdateContentResponse(UpdateContentResponse),
    #[serde(rename = "createFileResponse")]
    CreateFileResponse(PathResponse),
    #[serde(rename = "createFolderResponse")]
    CreateFolderResponse(PathResponse),
    #[serde(rename = "deleteResponse")]
    DeleteResponse(PathResponse),
    #[serde(rename = "renameResponse")]
    RenameResponse(RenameResponse),
    #[serde(rename = "copyResponse")]
    CopyResponse(TransferResponse),
    #[serde(rename = "cutResponse")]
    CutResponse(TransferResponse),
    #[serde(rename = "pasteResponse")]
    PasteResponse(PasteResponse),

    // -- Terminal --
    #[serde(rename = "terminalConnected")]
    TerminalConnected(TerminalConnected),
    /// Raw pty output bytes, rendered verbatim by the terminal surface.
    #[serde(rename = "terminalResponse")]
    TerminalResponse(String),
    #[serde(rename = "terminalError")]
    TerminalError(TerminalError),
    #[serde(rename = "terminalClosed")]
    TerminalClosed(TerminalClosed),
}

impl ServerEvent {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Loaded(_) => "Loaded",
            Self::Error(_) => "error",
            Self::FetchDirResponse(_) => "fetchDirResponse",
            Self::FetchContentResponse(_) => "fetchContentResponse",
            Self::UpdateContentResponse(_) => "updateContentResponse",
            Self::CreateFileResponse(_) => "createFileResponse",
            Self::CreateFolderResponse(_) => "createFolderResponse",
            Self::DeleteResponse(_) => "deleteResponse",
            Self::RenameResponse(_) => "renameResponse",
            Self::CopyResponse(_) => "copyResponse",
            Self::CutResponse(_) => "cutResponse",
            Self::PasteResponse(_) => "pasteResponse",
            Self::TerminalConnected(_) => "terminalConnected",
            Self::TerminalResponse(_) => "terminalResponse",
            Self::TerminalError(_) => "terminalError",
            Self::TerminalClosed(_) => "terminalClosed",
        }
    }

    /// Serialize to a single wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a received envelope into a typed server event.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(envelope).map_err(ProtocolError::Decode)?;
        serde_json::from_value(value).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::DirEntry;

    #[test]
    fn test_client_event_wire_names() {
        let frame = ClientEvent::FetchDir(FetchDirRequest {
            id: Some(1),
            dir: "src".to_string(),
        })
        .encode()
        .unwrap();
        assert!(frame.contains("\"event\":\"fetchDir\""));
        assert!(frame.contains("\"dir\":\"src\""));

        let frame = ClientEvent::Connection.encode().unwrap();
        assert_eq!(frame, r#"{"event":"Connection"}"#);
    }

    #[test]
    fn test_client_event_round_trip_through_envelope() {
        let event = ClientEvent::Rename(RenameRequest {
            id: Some(9),
            old_path: "a/b.txt".to_string(),
            new_path: "a/c.txt".to_string(),
        });
        let envelope = Envelope::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(envelope.event, "rename");
        assert_eq!(envelope.request_id(), Some(9));
        assert_eq!(ClientEvent::from_envelope(&envelope).unwrap(), event);
    }

    #[test]
    fn test_server_event_decodes_from_frame() {
        let frame = r#"{"event":"fetchDirResponse","data":{"path":"src","contents":[{"name":"index.ts","isDir":false}]}}"#;
        let envelope = Envelope::decode(frame).unwrap();
        match ServerEvent::from_envelope(&envelope).unwrap() {
            ServerEvent::FetchDirResponse(resp) => {
                assert_eq!(resp.path.as_deref(), Some("src"));
                assert_eq!(resp.contents, vec![DirEntry::file("index.ts")]);
                assert!(resp.error.is_none());
            }
            other => panic!("expected fetchDirResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_response_is_bare_string() {
        let event = ServerEvent::TerminalResponse("hello\r\n".to_string());
        let frame = event.encode().unwrap();
        assert_eq!(frame, r#"{"event":"terminalResponse","data":"hello\r\n"}"#);
    }
}
