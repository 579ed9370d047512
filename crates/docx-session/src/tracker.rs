//! External change tracking.
//!
//! One long-lived task per watched session multiplexes filesystem events
//! and a debounce timer; it is the only background caller of the session
//! lock. Detected changes are parked as pending records that consumers can
//! check, acknowledge, or sync.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use docx_dom::WordDocument;
use docx_patch::PatchOp;
use docx_session_core::{ChangeSummary, SessionError};

use crate::diff::{diff_bodies, ElementChange};
use crate::fingerprint::{content_hash, file_hash};
use crate::manager::{SessionManager, SyncResult};

/// A detected-but-unapplied external modification.
#[derive(Debug, Clone, Serialize)]
pub struct PendingChange {
    pub change_id: String,
    pub session_id: String,
    pub detected_at: chrono::DateTime<chrono::Utc>,
    pub previous_file_hash: String,
    pub new_file_hash: String,
    pub summary: ChangeSummary,
    pub changes: Vec<ElementChange>,
    pub patches: Vec<PatchOp>,
    pub acknowledged: bool,
}

struct WatchState {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
    /// The watcher stops when dropped.
    _watcher: RecommendedWatcher,
}

/// Shared state the per-session watch tasks operate on.
struct TrackerShared {
    manager: Arc<SessionManager>,
    pending: DashMap<String, PendingChange>,
    known_hashes: DashMap<String, String>,
}

pub struct ExternalChangeTracker {
    shared: Arc<TrackerShared>,
    debounce: Duration,
    watches: DashMap<String, WatchState>,
}

impl ExternalChangeTracker {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let debounce = manager.config().watch_debounce();
        Self {
            shared: Arc::new(TrackerShared {
                manager,
                pending: DashMap::new(),
                known_hashes: DashMap::new(),
            }),
            debounce,
            watches: DashMap::new(),
        }
    }

    /// Begin watching a session's source file. Captures the current file
    /// hash as the known state and installs a filesystem watch with a
    /// debounce window.
    pub async fn start_watching(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.shared.manager.get(session_id)?;
        let Some(source) = session.source_path().await else {
            return Err(SessionError::NotFound(format!(
                "session {session_id} has no source path to watch"
            )));
        };

        if let Ok(bytes) = std::fs::read(&source) {
            self.shared
                .known_hashes
                .insert(session_id.to_string(), file_hash(&bytes));
        }

        let (event_tx, event_rx) = mpsc::channel::<()>(64);
        let watched_path = source.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if event.paths.iter().any(|p| p == &watched_path) {
                        let _ = event_tx.blocking_send(());
                    }
                }
                Err(e) => warn!(error = %e, "watch error"),
            },
            NotifyConfig::default(),
        )
        .map_err(|e| SessionError::Io(format!("failed to create watcher: {e}")))?;

        // File watchers need the directory.
        let watch_dir = source.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                SessionError::Io(format!("failed to watch {}: {e}", watch_dir.display()))
            })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(watch_loop(
            Arc::clone(&self.shared),
            session_id.to_string(),
            source.clone(),
            event_rx,
            stop_rx,
            self.debounce,
        ));

        self.watches.insert(
            session_id.to_string(),
            WatchState {
                stop_tx,
                task,
                _watcher: watcher,
            },
        );
        info!(session_id, source = %source.display(), "started watching");
        Ok(())
    }

    /// Stop watching a session and drop any pending record for it.
    pub fn stop_watching(&self, session_id: &str) {
        if let Some((_, state)) = self.watches.remove(session_id) {
            let _ = state.stop_tx.send(true);
            state.task.abort();
            info!(session_id, "stopped watching");
        }
        self.shared.pending.remove(session_id);
        self.shared.known_hashes.remove(session_id);
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.watches.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_watching(&id);
        }
    }

    /// Retrieve the pending change for a session, if any.
    pub fn check(&self, session_id: &str) -> Option<PendingChange> {
        self.shared.pending.get(session_id).map(|p| p.clone())
    }

    /// Mark the pending change as seen. Returns whether one existed.
    pub fn acknowledge(&self, session_id: &str) -> bool {
        match self.shared.pending.get_mut(session_id) {
            Some(mut pending) => {
                pending.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Sessions that currently have a pending change.
    pub fn pending_sessions(&self) -> Vec<String> {
        self.shared.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Apply the pending external change by syncing the session from its
    /// source file. Clears the pending record on success.
    pub async fn sync(&self, session_id: &str) -> SyncResult {
        let result = self.shared.manager.sync_external(session_id).await;
        if result.success {
            self.shared.pending.remove(session_id);
            if let Ok(session) = self.shared.manager.get(session_id) {
                if let Some(source) = session.source_path().await {
                    if let Ok(bytes) = std::fs::read(&source) {
                        self.shared
                            .known_hashes
                            .insert(session_id.to_string(), file_hash(&bytes));
                    }
                }
            }
        }
        result
    }
}

/// The per-session background task: collapse bursts of filesystem events
/// into one evaluation per debounce window, until stopped.
async fn watch_loop(
    shared: Arc<TrackerShared>,
    session_id: String,
    source: PathBuf,
    mut events: mpsc::Receiver<()>,
    mut stop_rx: watch::Receiver<bool>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        let timer = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            received = events.recv() => match received {
                Some(()) => deadline = Some(Instant::now() + debounce),
                None => break,
            },
            () = timer => {
                deadline = None;
                evaluate(&shared, &session_id, &source).await;
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
    debug!(%session_id, "watch task exited");
}

/// Decide whether the debounced event is a real change, and park it as
/// pending if so.
async fn evaluate(shared: &TrackerShared, session_id: &str, source: &Path) {
    let bytes = match std::fs::read(source) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(session_id, source = %source.display(), error = %e, "source unreadable");
            return;
        }
    };
    let new_file_hash = file_hash(&bytes);
    let previous_file_hash = shared
        .known_hashes
        .get(session_id)
        .map(|h| h.clone())
        .unwrap_or_default();
    if previous_file_hash == new_file_hash {
        return;
    }

    let session = match shared.manager.get(session_id) {
        Ok(session) => session,
        Err(e) => {
            warn!(session_id, error = %e, "session vanished while watching");
            return;
        }
    };
    let new_doc = match WordDocument::from_bytes(&bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(session_id, error = %e, "modified source is not a readable document");
            return;
        }
    };

    let threshold = shared.manager.config().similarity_threshold;
    let diff = session
        .with_document(|doc| {
            // Content-only gate: a rewrite that only reassigns ids is a no-op.
            if content_hash(doc) == content_hash(&new_doc) {
                None
            } else {
                Some(diff_bodies(doc, &new_doc, threshold))
            }
        })
        .await;

    shared
        .known_hashes
        .insert(session_id.to_string(), new_file_hash.clone());

    let Some(diff) = diff else {
        debug!(session_id, "file changed on disk but content is identical");
        return;
    };

    let pending = PendingChange {
        change_id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        detected_at: chrono::Utc::now(),
        previous_file_hash,
        new_file_hash,
        summary: diff.summary,
        changes: diff.changes,
        patches: diff.patches,
        acknowledged: false,
    };
    info!(
        session_id,
        total = pending.summary.total_changes,
        "detected external change"
    );
    shared.pending.insert(session_id.to_string(), pending);
}
