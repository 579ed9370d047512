//! The in-memory session handle.

use std::path::PathBuf;

use tokio::sync::{Mutex, MutexGuard};

use docx_dom::WordDocument;
use docx_patch::{query_text, PatchOp};
use docx_session_core::SessionError;
use docx_wal::MappedWal;

/// One open document session. All mutable state sits behind the session's
/// writer lock; reads take the same lock briefly and clone what they need.
pub struct Session {
    id: String,
    inner: Mutex<SessionInner>,
}

pub(crate) struct SessionInner {
    pub doc: WordDocument,
    pub wal: MappedWal,
    pub source_path: Option<PathBuf>,
    pub cursor: u64,
    /// Mirror of the index's checkpoint set, sorted ascending.
    pub checkpoints: Vec<u64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub(crate) fn new(id: String, inner: SessionInner) -> Self {
        Self {
            id,
            inner: Mutex::new(inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().await
    }

    /// Run a closure against the current DOM under the session lock.
    pub async fn with_document<T>(&self, f: impl FnOnce(&WordDocument) -> T) -> T {
        let inner = self.inner.lock().await;
        f(&inner.doc)
    }

    /// Text content at a typed path.
    pub async fn query_text(&self, path: &str) -> Result<String, SessionError> {
        let inner = self.inner.lock().await;
        query_text(&inner.doc, path)
    }

    /// Serialized bytes of the current state.
    pub async fn document_bytes(&self) -> Vec<u8> {
        let inner = self.inner.lock().await;
        inner.doc.to_bytes()
    }

    pub async fn cursor(&self) -> u64 {
        self.inner.lock().await.cursor
    }

    pub async fn wal_len(&self) -> u64 {
        self.inner.lock().await.wal.len()
    }

    pub async fn source_path(&self) -> Option<PathBuf> {
        self.inner.lock().await.source_path.clone()
    }

    /// Execute a batch against a clone of the DOM, returning the would-be
    /// outcome without touching the session or its WAL.
    pub async fn dry_run(&self, ops: &[PatchOp]) -> Result<WordDocument, SessionError> {
        let inner = self.inner.lock().await;
        docx_patch::dry_run(&inner.doc, ops).map_err(docx_patch::PatchError::into_session_error)
    }
}
