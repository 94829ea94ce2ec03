//! In-process workspace runner for integration tests.
//!
//! Listens on an ephemeral port, accepts sequential WebSocket connections,
//! and serves a small in-memory file tree plus an echoing terminal. Requests
//! are recorded so tests can assert on what the client actually sent.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devex_client::{OfflinePolicy, ReconnectConfig, SessionConfig};
use devex_protocol::files::{
    CopyRequest, CreatePathRequest, CutRequest, DeleteRequest, FetchContentRequest,
    FetchContentResponse, FetchDirRequest, FetchDirResponse, Loaded, PasteRequest, PasteResponse,
    PathResponse, RenameRequest, RenameResponse, TransferResponse, UpdateContentRequest,
    UpdateContentResponse,
};
use devex_protocol::terminal::{
    CloseTerminal, RequestTerminal, TerminalClosed, TerminalConnected, TerminalError,
    TerminalInput,
};
use devex_protocol::{parent_dir, DirEntry, Envelope, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

#[derive(Clone, Copy, PartialEq)]
enum ClipMode {
    Copy,
    Cut,
}

#[derive(Default)]
struct RunnerState {
    files: HashMap<String, String>,
    dirs: HashSet<String>,
    clipboard: Option<(String, ClipMode)>,
    term_counter: u64,
    term_id: Option<String>,
}

impl RunnerState {
    fn ensure_parents(&mut self, path: &str) {
        let mut dir = parent_dir(path);
        while !dir.is_empty() {
            self.dirs.insert(dir.to_string());
            dir = parent_dir(dir);
        }
    }

    fn listing(&self, dir: &str) -> Vec<DirEntry> {
        let mut entries = Vec::new();
        for d in &self.dirs {
            if !d.is_empty() && parent_dir(d) == dir {
                let name = d.rsplit('/').next().unwrap_or(d);
                entries.push(DirEntry::dir(name));
            }
        }
        for f in self.files.keys() {
            if parent_dir(f) == dir {
                let name = f.rsplit('/').next().unwrap_or(f);
                entries.push(DirEntry::file(name));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

pub struct FakeRunner {
    addr: SocketAddr,
    state: Arc<Mutex<RunnerState>>,
    received: Arc<Mutex<Vec<Envelope>>>,
    kick: Arc<Notify>,
    connections: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub async fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(RunnerState::default()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let kick = Arc::new(Notify::new());
        let connections = Arc::new(AtomicUsize::new(0));

        {
            let state = state.clone();
            let received = received.clone();
            let kick = kick.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    serve(ws, &state, &received, &kick).await;
                }
            });
        }

        Self {
            addr,
            state,
            received,
            kick,
            connections,
        }
    }

    pub fn add_file(&self, path: &str, content: &str) {
        let mut st = self.state.lock().unwrap();
        st.ensure_parents(path);
        st.files.insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// Session config pointed at this runner, tuned for fast test turnaround.
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            runner_host: self.addr.to_string(),
            use_tls: false,
            reconnect: ReconnectConfig {
                max_attempts: 50,
                base_backoff_ms: 20,
                max_backoff_ms: 200,
            },
            offline_policy: OfflinePolicy::Queue,
            request_timeout_ms: 5_000,
            ..SessionConfig::default()
        }
    }

    /// Force-drop the current connection without a close frame.
    pub fn kick(&self) {
        self.kick.notify_waiters();
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }
}

async fn serve(
    ws: WebSocketStream<TcpStream>,
    state: &Arc<Mutex<RunnerState>>,
    received: &Arc<Mutex<Vec<Envelope>>>,
    kick: &Arc<Notify>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = kick.notified() => return,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let envelope = Envelope::decode(text.as_str()).unwrap();
                    received.lock().unwrap().push(envelope.clone());
                    for reply in respond(state, &envelope) {
                        let frame = reply.encode().unwrap();
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return,
                Some(Ok(_)) => {}
                Some(Err(_)) => return,
            },
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> T {
    serde_json::from_value(envelope.data.clone()).unwrap()
}

fn respond(state: &Arc<Mutex<RunnerState>>, envelope: &Envelope) -> Vec<ServerEvent> {
    let mut st = state.lock().unwrap();
    match envelope.event.as_str() {
        "Connection" => vec![ServerEvent::Loaded(Loaded {
            root_contents: st.listing(""),
        })],
        "fetchDir" => {
            let req: FetchDirRequest = payload(envelope);
            if req.dir.is_empty() || st.dirs.contains(&req.dir) {
                vec![ServerEvent::FetchDirResponse(FetchDirResponse {
                    id: req.id,
                    path: Some(req.dir.clone()),
                    contents: st.listing(&req.dir),
                    error: None,
                })]
            } else {
                vec![ServerEvent::FetchDirResponse(FetchDirResponse {
                    id: req.id,
                    path: Some(req.dir),
                    contents: Vec::new(),
                    error: Some("no such directory".to_string()),
                })]
            }
        }
        "fetchContent" => {
            let req: FetchContentRequest = payload(envelope);
            match st.files.get(&req.path) {
                Some(content) => vec![ServerEvent::FetchContentResponse(FetchContentResponse {
                    id: req.id,
                    path: Some(req.path.clone()),
                    content: Some(content.clone()),
                    error: None,
                })],
                None => vec![ServerEvent::FetchContentResponse(FetchContentResponse {
                    id: req.id,
                    path: Some(req.path),
                    content: None,
                    error: Some("no such file".to_string()),
                })],
            }
        }
        "updateContent" => {
            let req: UpdateContentRequest = payload(envelope);
            let applied = st.files.get(&req.path).and_then(|base| {
                let patch = diffy::Patch::from_str(&req.patch).ok()?;
                diffy::apply(base, &patch).ok()
            });
            match applied {
                Some(next) => {
                    st.files.insert(req.path, next);
                    vec![ServerEvent::UpdateContentResponse(UpdateContentResponse {
                        id: req.id,
                        success: Some(true),
                        error: None,
                    })]
                }
                None => vec![ServerEvent::UpdateContentResponse(UpdateContentResponse {
                    id: req.id,
                    success: None,
                    error: Some("patch did not apply".to_string()),
                })],
            }
        }
        "createFile" => {
            let req: CreatePathRequest = payload(envelope);
            st.ensure_parents(&req.path);
            st.files.insert(req.path.clone(), String::new());
            vec![ServerEvent::CreateFileResponse(PathResponse {
                id: req.id,
                path: Some(req.path),
                error: None,
            })]
        }
        "createFolder" => {
            let req: CreatePathRequest = payload(envelope);
            st.ensure_parents(&req.path);
            st.dirs.insert(req.path.clone());
            vec![ServerEvent::CreateFolderResponse(PathResponse {
                id: req.id,
                path: Some(req.path),
                error: None,
            })]
        }
        "delete" => {
            let req: DeleteRequest = payload(envelope);
            st.files.remove(&req.path);
            st.dirs.remove(&req.path);
            vec![ServerEvent::DeleteResponse(PathResponse {
                id: req.id,
                path: Some(req.path),
                error: None,
            })]
        }
        "rename" => {
            let req: RenameRequest = payload(envelope);
            if let Some(content) = st.files.remove(&req.old_path) {
                st.ensure_parents(&req.new_path);
                st.files.insert(req.new_path.clone(), content);
            }
            vec![ServerEvent::RenameResponse(RenameResponse {
                id: req.id,
                old_path: Some(req.old_path),
                new_path: Some(req.new_path),
                error: None,
            })]
        }
        "copy" => {
            let req: CopyRequest = payload(envelope);
            st.clipboard = Some((req.source_path.clone(), ClipMode::Copy));
            vec![ServerEvent::CopyResponse(TransferResponse {
                id: req.id,
                source_path: Some(req.source_path),
                target_path: None,
                error: None,
            })]
        }
        "cut" => {
            let req: CutRequest = payload(envelope);
            st.clipboard = Some((req.source_path.clone(), ClipMode::Cut));
            vec![ServerEvent::CutResponse(TransferResponse {
                id: req.id,
                source_path: Some(req.source_path),
                target_path: None,
                error: None,
            })]
        }
        "paste" => {
            let req: PasteRequest = payload(envelope);
            let Some((source, mode)) = st.clipboard.clone() else {
                return vec![ServerEvent::PasteResponse(PasteResponse {
                    id: req.id,
                    target_path: Some(req.target_path),
                    error: Some("clipboard is empty".to_string()),
                })];
            };
            let name = source.rsplit('/').next().unwrap_or(&source).to_string();
            let target = if req.target_path.is_empty() {
                name
            } else {
                format!("{}/{}", req.target_path, name)
            };
            if let Some(content) = st.files.get(&source).cloned() {
                if mode == ClipMode::Cut {
                    st.files.remove(&source);
                    st.clipboard = None;
                }
                st.ensure_parents(&target);
                st.files.insert(target, content);
            }
            vec![ServerEvent::PasteResponse(PasteResponse {
                id: req.id,
                target_path: Some(req.target_path),
                error: None,
            })]
        }
        "requestTerminal" => {
            let _req: RequestTerminal = payload(envelope);
            st.term_counter += 1;
            let id = format!("term-{}", st.term_counter);
            st.term_id = Some(id.clone());
            vec![ServerEvent::TerminalConnected(TerminalConnected {
                session_id: id,
            })]
        }
        "terminalInput" => {
            let req: TerminalInput = payload(envelope);
            if st.term_id.as_deref() == Some(req.session_id.as_str()) {
                // Echo terminal: whatever comes in goes straight back out.
                vec![ServerEvent::TerminalResponse(req.data)]
            } else {
                vec![ServerEvent::TerminalError(TerminalError {
                    error: "unknown terminal session".to_string(),
                })]
            }
        }
        "terminalResize" => Vec::new(),
        "closeTerminal" => {
            let req: CloseTerminal = payload(envelope);
            st.term_id = None;
            vec![ServerEvent::TerminalClosed(TerminalClosed {
                session_id: Some(req.session_id),
            })]
        }
        _ => Vec::new(),
    }
}

/// Poll until `check` passes, failing the test after a few seconds.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
