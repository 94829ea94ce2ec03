//! File tree mirror, diff-based content sync, and the clipboard flow.
//!
//! The mirror is runner-authoritative: tree mutations only land in local state
//! when the runner confirms them. Mutation requests are fire-and-forget; the
//! corresponding response handler refreshes the affected directory so the
//! mirror converges even when a change came from another client of the same
//! workspace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use devex_protocol::files::{
    CopyRequest, CreatePathRequest, CutRequest, DeleteRequest, FetchContentRequest,
    FetchContentResponse, FetchDirRequest, FetchDirResponse, Loaded, PasteRequest, PasteResponse,
    PathResponse, RenameRequest, RenameResponse, RunnerError, TransferResponse,
    UpdateContentRequest, UpdateContentResponse,
};
use devex_protocol::{parent_dir, ClientEvent, DirEntry};
use log::warn;
use tokio::sync::broadcast;

use crate::error::ClientError;
use crate::session::{NoticeLevel, Session};
use crate::transport::ConnectionState;

/// How the clipboard entry will behave on paste.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardMode {
    /// Paste duplicates the source.
    Copy,
    /// Paste moves the source; the clipboard is cleared afterwards.
    Cut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardEntry {
    pub path: String,
    pub mode: ClipboardMode,
}

/// The file currently open in the editor surface.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenFile {
    pub path: String,
    /// Editor language hint derived from the file extension.
    pub file_type: String,
    /// Content as last confirmed with the runner; diffs are computed against
    /// this.
    pub last_synced: String,
}

/// State change notifications for UI layers.
#[derive(Debug, Clone, PartialEq)]
pub enum FsUpdate {
    DirLoaded { path: String },
    FileOpened { path: String },
    FileSaved { path: String },
    Mutated { op: &'static str, path: String },
    Failed { op: &'static str, error: String },
}

#[derive(Default)]
struct FsState {
    /// Directory path -> last known listing. The workspace root is `""`.
    tree: HashMap<String, Vec<DirEntry>>,
    open_file: Option<OpenFile>,
    clipboard: Option<ClipboardEntry>,
}

/// Editor language hint for a workspace path.
pub(crate) fn file_type_of(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    let ext = match name.rfind('.') {
        Some(i) if i > 0 => &name[i + 1..],
        _ => "",
    };
    match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" => "javascript",
        "rs" => "rust",
        "py" => "python",
        "go" => "go",
        "c" | "h" => "c",
        "json" => "json",
        "md" => "markdown",
        "html" => "html",
        "css" => "css",
        "toml" => "toml",
        "yml" | "yaml" => "yaml",
        "sh" => "shell",
        _ => "plaintext",
    }
}

pub struct FileWorkspace {
    session: Arc<Session>,
    state: Arc<Mutex<FsState>>,
    updates_tx: broadcast::Sender<FsUpdate>,
}

impl FileWorkspace {
    pub fn new(session: Arc<Session>) -> Self {
        let state = Arc::new(Mutex::new(FsState::default()));
        let (updates_tx, _) = broadcast::channel(64);

        register_handlers(&session, state.clone(), updates_tx.clone());
        spawn_resync(&session, state.clone());

        Self {
            session,
            state,
            updates_tx,
        }
    }

    /// Fetch a directory listing and cache it in the mirror.
    pub async fn fetch_dir(&self, dir: &str) -> Result<Vec<DirEntry>, ClientError> {
        let id = self.session.next_id();
        let event = ClientEvent::FetchDir(FetchDirRequest {
            id: Some(id),
            dir: dir.to_string(),
        });
        let resp: FetchDirResponse = self.session.request(&event, "fetchDirResponse", id).await?;
        if let Some(error) = resp.error {
            self.session
                .notify(NoticeLevel::Warning, format!("fetchDir failed: {error}"));
            return Err(ClientError::Remote(error));
        }
        let path = resp.path.unwrap_or_else(|| dir.to_string());
        self.state
            .lock()
            .unwrap()
            .tree
            .insert(path.clone(), resp.contents.clone());
        let _ = self.updates_tx.send(FsUpdate::DirLoaded { path });
        Ok(resp.contents)
    }

    /// Open a file: fetch its content and make it the diff base for
    /// subsequent saves.
    pub async fn open(&self, path: &str) -> Result<String, ClientError> {
        let id = self.session.next_id();
        let event = ClientEvent::FetchContent(FetchContentRequest {
            id: Some(id),
            path: path.to_string(),
        });
        let resp: FetchContentResponse = self
            .session
            .request(&event, "fetchContentResponse", id)
            .await?;
        if let Some(error) = resp.error {
            self.session
                .notify(NoticeLevel::Warning, format!("fetchContent failed: {error}"));
            return Err(ClientError::Remote(error));
        }
        let path = resp.path.unwrap_or_else(|| path.to_string());
        let content = resp.content.unwrap_or_default();
        {
            let mut st = self.state.lock().unwrap();
            st.open_file = Some(OpenFile {
                file_type: file_type_of(&path).to_string(),
                path: path.clone(),
                last_synced: content.clone(),
            });
        }
        let _ = self.updates_tx.send(FsUpdate::FileOpened { path });
        Ok(content)
    }

    /// Sync the open file's edits to the runner as a text diff.
    ///
    /// Returns `Ok(false)` when `current` matches the last-synced content and
    /// nothing was transmitted. The diff base advances as soon as the patch is
    /// queued so a save fired while the previous one is still in flight diffs
    /// against the right content.
    pub fn save(&self, current: &str) -> Result<bool, ClientError> {
        let (event, previous) = {
            let mut st = self.state.lock().unwrap();
            let open = st.open_file.as_mut().ok_or(ClientError::NoOpenFile)?;
            let patch = diffy::create_patch(&open.last_synced, current);
            if patch.hunks().is_empty() {
                return Ok(false);
            }
            let patch_text = patch.to_string();
            let previous = std::mem::replace(&mut open.last_synced, current.to_string());
            let event = ClientEvent::UpdateContent(UpdateContentRequest {
                id: Some(self.session.next_id()),
                path: open.path.clone(),
                patch: patch_text,
            });
            (event, previous)
        };
        if let Err(e) = self.session.emit(&event) {
            // Roll the diff base back so the edit is not silently lost.
            if let Some(open) = self.state.lock().unwrap().open_file.as_mut() {
                open.last_synced = previous;
            }
            return Err(e);
        }
        Ok(true)
    }

    pub fn create_file(&self, path: &str) -> Result<(), ClientError> {
        self.session.emit(&ClientEvent::CreateFile(CreatePathRequest {
            id: Some(self.session.next_id()),
            path: path.to_string(),
        }))
    }

    pub fn create_folder(&self, path: &str) -> Result<(), ClientError> {
        self.session
            .emit(&ClientEvent::CreateFolder(CreatePathRequest {
                id: Some(self.session.next_id()),
                path: path.to_string(),
            }))
    }

    pub fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.session.emit(&ClientEvent::Delete(DeleteRequest {
            id: Some(self.session.next_id()),
            path: path.to_string(),
        }))
    }

    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), ClientError> {
        self.session.emit(&ClientEvent::Rename(RenameRequest {
            id: Some(self.session.next_id()),
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        }))
    }

    /// Put a path on the clipboard for duplication.
    pub fn copy(&self, path: &str) -> Result<(), ClientError> {
        self.session.emit(&ClientEvent::Copy(CopyRequest {
            id: Some(self.session.next_id()),
            source_path: path.to_string(),
            target_path: None,
        }))?;
        self.state.lock().unwrap().clipboard = Some(ClipboardEntry {
            path: path.to_string(),
            mode: ClipboardMode::Copy,
        });
        Ok(())
    }

    /// Put a path on the clipboard for a move.
    pub fn cut(&self, path: &str) -> Result<(), ClientError> {
        self.session.emit(&ClientEvent::Cut(CutRequest {
            id: Some(self.session.next_id()),
            source_path: path.to_string(),
        }))?;
        self.state.lock().unwrap().clipboard = Some(ClipboardEntry {
            path: path.to_string(),
            mode: ClipboardMode::Cut,
        });
        Ok(())
    }

    /// Paste the clipboard entry into a target directory.
    pub fn paste(&self, target_dir: &str) -> Result<(), ClientError> {
        if self.state.lock().unwrap().clipboard.is_none() {
            return Err(ClientError::ClipboardEmpty);
        }
        self.session.emit(&ClientEvent::Paste(PasteRequest {
            id: Some(self.session.next_id()),
            target_path: target_dir.to_string(),
        }))
    }

    /// Cached listing for a directory, if one has been fetched.
    pub fn dir_listing(&self, path: &str) -> Option<Vec<DirEntry>> {
        self.state.lock().unwrap().tree.get(path).cloned()
    }

    pub fn current_file(&self) -> Option<OpenFile> {
        self.state.lock().unwrap().open_file.clone()
    }

    pub fn clipboard(&self) -> Option<ClipboardEntry> {
        self.state.lock().unwrap().clipboard.clone()
    }

    pub fn updates(&self) -> broadcast::Receiver<FsUpdate> {
        self.updates_tx.subscribe()
    }
}

/// Re-fetch a directory so the mirror picks up a confirmed mutation.
fn refresh_dir(session: &Weak<Session>, dir: &str) {
    let Some(session) = session.upgrade() else {
        return;
    };
    let event = ClientEvent::FetchDir(FetchDirRequest {
        id: Some(session.next_id()),
        dir: dir.to_string(),
    });
    if let Err(e) = session.emit(&event) {
        warn!("failed to refresh directory '{dir}': {e}");
    }
}

/// Re-fetch a file's content so the diff base matches the runner again.
fn refetch_file(session: &Weak<Session>, path: &str) {
    let Some(session) = session.upgrade() else {
        return;
    };
    let event = ClientEvent::FetchContent(FetchContentRequest {
        id: Some(session.next_id()),
        path: path.to_string(),
    });
    if let Err(e) = session.emit(&event) {
        warn!("failed to re-fetch '{path}': {e}");
    }
}

fn notify(session: &Weak<Session>, level: NoticeLevel, message: String) {
    if let Some(session) = session.upgrade() {
        session.notify(level, message);
    }
}

fn register_handlers(
    session: &Arc<Session>,
    state: Arc<Mutex<FsState>>,
    updates_tx: broadcast::Sender<FsUpdate>,
) {
    let weak = Arc::downgrade(session);

    {
        let state = state.clone();
        let updates = updates_tx.clone();
        session.on_payload::<Loaded, _>("Loaded", move |payload| {
            state
                .lock()
                .unwrap()
                .tree
                .insert(String::new(), payload.root_contents);
            let _ = updates.send(FsUpdate::DirLoaded {
                path: String::new(),
            });
        });
    }

    {
        let weak = weak.clone();
        session.on_payload::<RunnerError, _>("error", move |payload| {
            notify(
                &weak,
                NoticeLevel::Error,
                format!("runner error: {}", payload.message),
            );
        });
    }

    // Uncorrelated directory listings (refreshes, other clients' mutations)
    // land here; correlated ones are consumed by the request waiters first.
    {
        let weak = weak.clone();
        let state = state.clone();
        let updates = updates_tx.clone();
        session.on_payload::<FetchDirResponse, _>("fetchDirResponse", move |resp| {
            if let Some(error) = resp.error {
                notify(&weak, NoticeLevel::Warning, format!("fetchDir failed: {error}"));
                let _ = updates.send(FsUpdate::Failed {
                    op: "fetchDir",
                    error,
                });
                return;
            }
            let Some(path) = resp.path else { return };
            state
                .lock()
                .unwrap()
                .tree
                .insert(path.clone(), resp.contents);
            let _ = updates.send(FsUpdate::DirLoaded { path });
        });
    }

    {
        let weak = weak.clone();
        let state = state.clone();
        let updates = updates_tx.clone();
        session.on_payload::<FetchContentResponse, _>("fetchContentResponse", move |resp| {
            if let Some(error) = resp.error {
                notify(
                    &weak,
                    NoticeLevel::Warning,
                    format!("fetchContent failed: {error}"),
                );
                let _ = updates.send(FsUpdate::Failed {
                    op: "fetchContent",
                    error,
                });
                return;
            }
            let Some(path) = resp.path else { return };
            let content = resp.content.unwrap_or_default();
            state.lock().unwrap().open_file = Some(OpenFile {
                file_type: file_type_of(&path).to_string(),
                path: path.clone(),
                last_synced: content,
            });
            let _ = updates.send(FsUpdate::FileOpened { path });
        });
    }

    {
        let weak = weak.clone();
        let state = state.clone();
        let updates = updates_tx.clone();
        session.on_payload::<UpdateContentResponse, _>("updateContentResponse", move |resp| {
            if let Some(error) = resp.error {
                notify(&weak, NoticeLevel::Warning, format!("save failed: {error}"));
                // The runner rejected the patch, so the advanced diff base no
                // longer matches its content. Re-fetch to re-establish it;
                // the fetchContentResponse handler resets the base.
                let open_path = state
                    .lock()
                    .unwrap()
                    .open_file
                    .as_ref()
                    .map(|f| f.path.clone());
                if let Some(path) = open_path {
                    refetch_file(&weak, &path);
                }
                let _ = updates.send(FsUpdate::Failed {
                    op: "updateContent",
                    error,
                });
                return;
            }
            let path = state
                .lock()
                .unwrap()
                .open_file
                .as_ref()
                .map(|f| f.path.clone())
                .unwrap_or_default();
            let _ = updates.send(FsUpdate::FileSaved { path });
        });
    }

    for op in ["createFile", "createFolder", "delete"] {
        let weak = weak.clone();
        let updates = updates_tx.clone();
        session.on_payload::<PathResponse, _>(format!("{op}Response"), move |resp| {
            if let Some(error) = resp.error {
                notify(&weak, NoticeLevel::Warning, format!("{op} failed: {error}"));
                let _ = updates.send(FsUpdate::Failed { op, error });
                return;
            }
            let Some(path) = resp.path else { return };
            refresh_dir(&weak, parent_dir(&path));
            let _ = updates.send(FsUpdate::Mutated { op, path });
        });
    }

    {
        let weak = weak.clone();
        let updates = updates_tx.clone();
        session.on_payload::<RenameResponse, _>("renameResponse", move |resp| {
            if let Some(error) = resp.error {
                notify(&weak, NoticeLevel::Warning, format!("rename failed: {error}"));
                let _ = updates.send(FsUpdate::Failed {
                    op: "rename",
                    error,
                });
                return;
            }
            let Some(new_path) = resp.new_path else { return };
            refresh_dir(&weak, parent_dir(&new_path));
            if let Some(old_path) = resp.old_path {
                if parent_dir(&old_path) != parent_dir(&new_path) {
                    refresh_dir(&weak, parent_dir(&old_path));
                }
            }
            let _ = updates.send(FsUpdate::Mutated {
                op: "rename",
                path: new_path,
            });
        });
    }

    for op in ["copy", "cut"] {
        let weak = weak.clone();
        let state = state.clone();
        let updates = updates_tx.clone();
        session.on_payload::<TransferResponse, _>(format!("{op}Response"), move |resp| {
            if let Some(error) = resp.error {
                notify(&weak, NoticeLevel::Warning, format!("{op} failed: {error}"));
                // The runner-side clipboard was not set; drop ours too.
                state.lock().unwrap().clipboard = None;
                let _ = updates.send(FsUpdate::Failed { op, error });
                return;
            }
            if let Some(path) = resp.source_path {
                let _ = updates.send(FsUpdate::Mutated { op, path });
            }
        });
    }

    {
        let state = state.clone();
        session.on_payload::<PasteResponse, _>("pasteResponse", move |resp| {
            if let Some(error) = resp.error {
                notify(&weak, NoticeLevel::Warning, format!("paste failed: {error}"));
                let _ = updates_tx.send(FsUpdate::Failed { op: "paste", error });
                return;
            }
            let Some(target) = resp.target_path else { return };
            refresh_dir(&weak, &target);
            let taken = state.lock().unwrap().clipboard.take();
            if let Some(entry) = taken {
                if entry.mode == ClipboardMode::Cut {
                    // The source was moved away; its directory changed too.
                    refresh_dir(&weak, parent_dir(&entry.path));
                } else {
                    // Copy entries can be pasted again.
                    state.lock().unwrap().clipboard = Some(entry);
                }
            }
            let _ = updates_tx.send(FsUpdate::Mutated {
                op: "paste",
                path: target,
            });
        });
    }
}

/// After a reconnect, re-fetch everything the mirror was tracking so it
/// converges with whatever happened while the socket was down.
fn spawn_resync(session: &Arc<Session>, state: Arc<Mutex<FsState>>) {
    let weak = Arc::downgrade(session);
    let mut transitions = session.transitions();
    tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(ConnectionState::Open) => {
                    let Some(session) = weak.upgrade() else { return };
                    let (dirs, open_path) = {
                        let st = state.lock().unwrap();
                        let dirs: Vec<String> = st.tree.keys().cloned().collect();
                        (dirs, st.open_file.as_ref().map(|f| f.path.clone()))
                    };
                    // An empty mirror has nothing that can go stale; a fresh
                    // session's first open lands here. This also covers a
                    // workspace attached to an already-open session, whose
                    // subscription never saw that first open.
                    if dirs.is_empty() && open_path.is_none() {
                        continue;
                    }
                    for dir in dirs {
                        let event = ClientEvent::FetchDir(FetchDirRequest {
                            id: Some(session.next_id()),
                            dir,
                        });
                        let _ = session.emit(&event);
                    }
                    if let Some(path) = open_path {
                        let event = ClientEvent::FetchContent(FetchContentRequest {
                            id: Some(session.next_id()),
                            path,
                        });
                        let _ = session.emit(&event);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
