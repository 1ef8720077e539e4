//! Background uploads: a spawned task per session, observable through a
//! watch channel and cancellable on its own or through a shared parent token.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::orchestrator::{UploadRequest, Uploader};
use super::progress::{ProgressEvent, ProgressReporter, TerminalEvent};
use super::session::UploadState;
use super::source::ChunkSource;

/// Latest known state of a background upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadStatus {
    pub state: UploadState,
    pub session_id: Option<String>,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percent: f64,
    pub terminal: Option<TerminalEvent>,
}

impl UploadStatus {
    fn initial(total_bytes: u64) -> Self {
        Self {
            state: UploadState::Initiating,
            session_id: None,
            bytes_transferred: 0,
            total_bytes,
            percent: 0.0,
            terminal: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }
}

/// Mirrors events into a watch channel before passing them on.
struct StatusReporter {
    tx: watch::Sender<UploadStatus>,
    inner: Arc<dyn ProgressReporter>,
}

impl ProgressReporter for StatusReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        self.tx.send_modify(|s| {
            s.session_id = Some(event.session_id.clone());
            s.bytes_transferred = event.bytes_transferred;
            s.total_bytes = event.total_bytes;
            s.percent = event.percent;
        });
        self.inner.on_progress(event);
    }

    fn on_terminal(&self, event: &TerminalEvent) {
        self.tx.send_modify(|s| s.terminal = Some(event.clone()));
        self.inner.on_terminal(event);
    }

    fn on_state(&self, session_id: &str, state: UploadState) {
        self.tx.send_modify(|s| {
            s.state = state;
            if !session_id.is_empty() {
                s.session_id = Some(session_id.to_string());
            }
        });
        self.inner.on_state(session_id, state);
    }
}

/// Owner's side of a spawned upload.
#[derive(Debug)]
pub struct UploadHandle {
    id: Uuid,
    status: watch::Receiver<UploadStatus>,
    cancel: CancellationToken,
    join: JoinHandle<TerminalEvent>,
}

impl UploadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> UploadStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadStatus> {
        self.status.clone()
    }

    /// Cancel this upload only. The task still emits its terminal event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal event. Errors only if the task panicked.
    pub async fn wait(self) -> Result<TerminalEvent, JoinError> {
        self.join.await
    }
}

/// Run one upload on the tokio runtime.
///
/// The upload gets a child of `parent`, so cancelling the parent (e.g. on
/// shutdown) stops every upload spawned from it, while
/// [`UploadHandle::cancel`] stops just this one.
pub fn spawn_upload(
    uploader: Arc<Uploader>,
    request: UploadRequest,
    mut source: Box<dyn ChunkSource>,
    reporter: Arc<dyn ProgressReporter>,
    parent: &CancellationToken,
) -> UploadHandle {
    let id = Uuid::new_v4();
    let cancel = parent.child_token();
    let (tx, status) = watch::channel(UploadStatus::initial(source.total_bytes()));
    let task_cancel = cancel.clone();

    let join = tokio::spawn(async move {
        let reporter = StatusReporter { tx, inner: reporter };
        uploader
            .upload(&request, source.as_mut(), &reporter, &task_cancel)
            .await
    });

    UploadHandle {
        id,
        status,
        cancel,
        join,
    }
}

struct Entry {
    label: String,
    status: watch::Receiver<UploadStatus>,
    cancel: CancellationToken,
}

/// Registry of background uploads, keyed by handle id.
///
/// Holds only status receivers and cancel tokens; the task itself stays with
/// whoever owns the [`UploadHandle`].
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, label: impl Into<String>, handle: &UploadHandle) {
        let entry = Entry {
            label: label.into(),
            status: handle.subscribe(),
            cancel: handle.cancel.clone(),
        };
        self.inner.write().await.insert(handle.id(), entry);
    }

    pub async fn status(&self, id: Uuid) -> Option<UploadStatus> {
        let guard = self.inner.read().await;
        guard.get(&id).map(|e| e.status.borrow().clone())
    }

    /// Returns `false` for unknown ids.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let guard = self.inner.read().await;
        match guard.get(&id) {
            Some(entry) => {
                tracing::info!(upload = %entry.label, "cancelling upload");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget an upload, returning its last status.
    pub async fn remove(&self, id: Uuid) -> Option<UploadStatus> {
        let entry = self.inner.write().await.remove(&id)?;
        let status = entry.status.borrow().clone();
        Some(status)
    }

    /// Every registered upload with its label, ordered by label.
    pub async fn snapshot(&self) -> Vec<(Uuid, String, UploadStatus)> {
        let guard = self.inner.read().await;
        let mut out: Vec<_> = guard
            .iter()
            .map(|(id, e)| (*id, e.label.clone(), e.status.borrow().clone()))
            .collect();
        out.sort_by(|a, b| a.1.cmp(&b.1));
        out
    }

    pub async fn active_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard
            .values()
            .filter(|e| !e.status.borrow().is_finished())
            .count()
    }
}
