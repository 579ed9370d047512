//! Session lifecycle and dispatch.
//!
//! The registry is a coarse concurrent map guarding lookup and creation
//! only; every mutation happens under the owning session's writer lock, and
//! cross-process mutation is additionally serialized by the per-session
//! advisory file lock for the whole apply → append → reindex section.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use docx_dom::{ensure_element_ids, BodyChild, WordDocument};
use docx_patch::PatchOp;
use docx_session_core::{
    ChangeSummary, SessionConfig, SessionError, SessionIndexEntry, SyncMeta, WalEntry,
    WalEntryKind,
};
use docx_wal::{MappedWal, SessionStore};

use crate::diff::diff_bodies;
use crate::fingerprint::{content_hash, fingerprint};
use crate::rehydrate;
use crate::session::{Session, SessionInner};
use crate::uncovered::diff_uncovered;

/// Outcome of an external sync attempt. Failures leave the session state
/// unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    /// WAL position of the appended sync entry, when one was written.
    pub position: Option<u64>,
    pub summary: ChangeSummary,
    pub uncovered_changes: usize,
}

impl SyncResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            position: None,
            summary: ChangeSummary::default(),
            uncovered_changes: 0,
        }
    }

    fn no_change() -> Self {
        Self {
            success: true,
            message: "source file matches session content".into(),
            position: None,
            summary: ChangeSummary::default(),
            uncovered_changes: 0,
        }
    }
}

pub struct SessionManager {
    config: SessionConfig,
    store: SessionStore,
    sessions: DashMap<String, Arc<Session>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let store = SessionStore::new(config.effective_sessions_dir());
        store.ensure_root()?;
        Ok(Self {
            config,
            store,
            sessions: DashMap::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open a session on a file, or synthesize an empty document when no
    /// path is given. The file's bytes become the session baseline.
    #[instrument(skip(self), level = "debug")]
    pub async fn open(&self, path: Option<&Path>) -> Result<String, SessionError> {
        let (mut doc, source_path) = match path {
            Some(p) => {
                let bytes = match std::fs::read(p) {
                    Ok(b) => b,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(SessionError::NotFound(format!(
                            "no file at {}",
                            p.display()
                        )))
                    }
                    Err(e) => {
                        return Err(SessionError::io(
                            format!("failed to read {}", p.display()),
                            e,
                        ))
                    }
                };
                let doc = WordDocument::from_bytes(&bytes).map_err(|e| {
                    SessionError::Format(format!(
                        "{} is not a well-formed word-processing document: {e}",
                        p.display()
                    ))
                })?;
                (doc, Some(p.to_path_buf()))
            }
            None => (WordDocument::new_empty(), None),
        };

        ensure_element_ids(&mut doc);
        let id = uuid::Uuid::new_v4().to_string();
        self.store.save_baseline(&id, &doc.to_bytes())?;
        let wal = MappedWal::open(&self.store.wal_path(&id))?;

        let entry = SessionIndexEntry::new(
            &id,
            source_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
        );
        let created_at = entry.created_at;
        self.store.update_index(|index| index.upsert(entry.clone()))?;

        let session = Arc::new(Session::new(
            id.clone(),
            SessionInner {
                doc,
                wal,
                source_path,
                cursor: 0,
                checkpoints: Vec::new(),
                created_at,
            },
        ));
        self.sessions.insert(id.clone(), session);
        info!(session_id = %id, "opened session");
        Ok(id)
    }

    /// Look up a loaded session.
    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(session_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| SessionError::NotFound(format!("unknown session {session_id}")))
    }

    /// Resolve an argument that may be a session id or a file path: an
    /// existing id wins, then a session already bound to that source path,
    /// then a fresh open of the path.
    pub async fn resolve(&self, id_or_path: &str) -> Result<Arc<Session>, SessionError> {
        if let Ok(session) = self.get(id_or_path) {
            return Ok(session);
        }
        // Collect handles first: the registry shard lock must not be held
        // across session-lock acquisition.
        let loaded: Vec<Arc<Session>> = self.sessions.iter().map(|s| Arc::clone(&s)).collect();
        for session in loaded {
            if session.source_path().await.as_deref() == Some(Path::new(id_or_path)) {
                return Ok(session);
            }
        }
        let id = self.open(Some(Path::new(id_or_path))).await?;
        self.get(&id)
    }

    /// Close a session and delete every durable artifact it owns.
    #[instrument(skip(self), level = "debug")]
    pub async fn close(&self, session_id: &str) -> Result<(), SessionError> {
        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(format!("unknown session {session_id}")))?;
        // Wait out any in-flight writer before deleting files under it.
        let _inner = session.lock().await;
        self.store.delete_session_files(session_id)?;
        self.store.update_index(|index| {
            index.remove(session_id);
        })?;
        info!(session_id, "closed session");
        Ok(())
    }

    /// Serialize the current DOM and write it to `dst`, or to the session's
    /// source path.
    #[instrument(skip(self), level = "debug")]
    pub async fn save(
        &self,
        session_id: &str,
        dst: Option<&Path>,
    ) -> Result<PathBuf, SessionError> {
        let session = self.get(session_id)?;
        let inner = session.lock().await;
        let target = match dst {
            Some(p) => p.to_path_buf(),
            None => inner.source_path.clone().ok_or_else(|| {
                SessionError::NotFound(format!(
                    "session {session_id} has no source path; provide a destination"
                ))
            })?,
        };
        write_atomic(&target, &inner.doc.to_bytes())?;
        debug!(session_id, path = %target.display(), "saved document");
        Ok(target)
    }

    /// Restore every session recorded in the index, reconciling the index
    /// against the filesystem. Corrupt WAL tails clamp the cursor and never
    /// abort the restore.
    pub async fn restore_sessions(&self) -> Result<usize, SessionError> {
        let Some(index) = self.store.load_index()? else {
            return Ok(0);
        };
        let mut restored = 0;
        for entry in &index.sessions {
            if self.sessions.contains_key(&entry.id) {
                continue;
            }
            match self.restore_one(entry) {
                Ok(session) => {
                    self.sessions.insert(entry.id.clone(), session);
                    restored += 1;
                }
                Err(e) => {
                    warn!(session_id = %entry.id, error = %e, "skipping unrestorable session");
                }
            }
        }
        info!(restored, "restored sessions");
        Ok(restored)
    }

    fn restore_one(&self, entry: &SessionIndexEntry) -> Result<Arc<Session>, SessionError> {
        let wal = MappedWal::open(&self.store.wal_path(&entry.id))?;
        // The filesystem, not the index, is the truth for checkpoints.
        let checkpoints = self.store.list_checkpoints(&entry.id)?;
        let target = entry.cursor_position.min(wal.len());
        let (doc, achieved) =
            rehydrate::rebuild(&self.store, &entry.id, &checkpoints, &wal, target)?;
        if achieved < target {
            warn!(
                session_id = %entry.id,
                target, achieved, "WAL replay stopped early, cursor clamped"
            );
        }
        let inner = SessionInner {
            doc,
            wal,
            source_path: entry.source_path.as_ref().map(PathBuf::from),
            cursor: achieved,
            checkpoints,
            created_at: entry.created_at,
        };
        self.sync_index_entry(&entry.id, &inner)?;
        Ok(Arc::new(Session::new(entry.id.clone(), inner)))
    }

    /// Index rows for every known session.
    pub fn list_sessions(&self) -> Result<Vec<SessionIndexEntry>, SessionError> {
        Ok(self
            .store
            .load_index()?
            .map(|index| index.sessions)
            .unwrap_or_default())
    }

    /// Opt a session in or out of automatic absorption of external changes.
    pub fn set_auto_sync(&self, session_id: &str, enabled: bool) -> Result<(), SessionError> {
        let found = self.store.update_index(|index| {
            if let Some(entry) = index.get_mut(session_id) {
                entry.auto_sync = enabled;
                entry.touch();
                true
            } else {
                false
            }
        })?;
        if found {
            Ok(())
        } else {
            Err(SessionError::NotFound(format!(
                "unknown session {session_id}"
            )))
        }
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Apply a patch batch: truncate any redo tail, run the engine, append
    /// the WAL entry, advance the cursor, update the index, and checkpoint
    /// when policy says so.
    #[instrument(skip(self, ops), level = "debug", fields(ops = ops.len()))]
    pub async fn apply_patches(
        &self,
        session_id: &str,
        ops: &[PatchOp],
    ) -> Result<u64, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock().await;
        let _guard = self.store.lock_session(session_id)?;

        self.discard_redo_tail(session_id, &mut inner)?;
        let canonical = docx_patch::apply_batch(&mut inner.doc, ops)
            .map_err(docx_patch::PatchError::into_session_error)?;

        let entry = WalEntry::patch(canonical, None);
        let position = inner.wal.append(&entry.to_line()?)?;
        inner.cursor = position;

        self.maybe_auto_checkpoint(session_id, &mut inner)?;
        self.sync_index_entry(session_id, &inner)?;

        if self.config.auto_save {
            if let Some(source) = inner.source_path.clone() {
                write_atomic(&source, &inner.doc.to_bytes())?;
            }
        }
        debug!(session_id, position, "applied patch batch");
        Ok(position)
    }

    /// Parse a JSON batch and apply it.
    pub async fn apply_patch_json(
        &self,
        session_id: &str,
        patches_json: &str,
    ) -> Result<u64, SessionError> {
        let ops = docx_patch::parse_batch(patches_json)?;
        self.apply_patches(session_id, &ops).await
    }

    /// Move the cursor back by `steps` (bounded at 0), rebuilding from the
    /// nearest checkpoint.
    #[instrument(skip(self), level = "debug")]
    pub async fn undo(&self, session_id: &str, steps: u64) -> Result<u64, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock().await;
        let target = inner.cursor.saturating_sub(steps);
        self.rebuild_to(session_id, &mut inner, target)
    }

    /// Move the cursor forward by `steps` (bounded at the WAL length),
    /// replaying onto the current DOM.
    #[instrument(skip(self), level = "debug")]
    pub async fn redo(&self, session_id: &str, steps: u64) -> Result<u64, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock().await;
        let inner = &mut *inner;
        let target = (inner.cursor + steps).min(inner.wal.len());
        let achieved =
            rehydrate::replay(&mut inner.doc, &inner.wal, inner.cursor, target, session_id);
        inner.cursor = achieved;
        self.sync_index_entry(session_id, inner)?;
        Ok(achieved)
    }

    /// Jump to an absolute position, always rebuilding from the nearest
    /// checkpoint at or below the target.
    #[instrument(skip(self), level = "debug")]
    pub async fn jump_to(&self, session_id: &str, position: u64) -> Result<u64, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock().await;
        if position > inner.wal.len() {
            return Err(SessionError::Conflict(format!(
                "cursor {position} is beyond the log ({} entries)",
                inner.wal.len()
            )));
        }
        self.rebuild_to(session_id, &mut inner, position)
    }

    /// Write a checkpoint at the current cursor. With `discard_redo`, also
    /// truncate the WAL at the cursor and drop later checkpoints.
    #[instrument(skip(self), level = "debug")]
    pub async fn snapshot(
        &self,
        session_id: &str,
        discard_redo: bool,
    ) -> Result<u64, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock().await;
        let _guard = self.store.lock_session(session_id)?;

        self.write_checkpoint(session_id, &mut inner)?;
        if discard_redo {
            self.discard_redo_tail(session_id, &mut inner)?;
        }
        self.sync_index_entry(session_id, &inner)?;
        Ok(inner.cursor)
    }

    // =========================================================================
    // External sync
    // =========================================================================

    /// Absorb an out-of-band modification of the session's source file as a
    /// single self-contained WAL entry. Failures leave the session
    /// untouched and are reported in the result.
    pub async fn sync_external(&self, session_id: &str) -> SyncResult {
        match self.try_sync(session_id).await {
            Ok(result) => result,
            Err(e) => SyncResult::failure(e.to_string()),
        }
    }

    async fn try_sync(&self, session_id: &str) -> Result<SyncResult, SessionError> {
        let session = self.get(session_id)?;
        let mut inner = session.lock().await;
        let Some(source) = inner.source_path.clone() else {
            return Ok(SyncResult::failure(format!(
                "session {session_id} has no source path to sync from"
            )));
        };

        let file_bytes = std::fs::read(&source)
            .map_err(|e| SessionError::io(format!("failed to read {}", source.display()), e))?;
        let new_doc = WordDocument::from_bytes(&file_bytes).map_err(|e| {
            SessionError::Format(format!(
                "{} is not a well-formed word-processing document: {e}",
                source.display()
            ))
        })?;

        // Content-only gate: id-only differences are not a change.
        let previous_hash = content_hash(&inner.doc);
        let new_hash = content_hash(&new_doc);
        if previous_hash == new_hash {
            return Ok(SyncResult::no_change());
        }

        let diff = diff_bodies(&inner.doc, &new_doc, self.config.similarity_threshold);
        let uncovered = diff_uncovered(&inner.doc, &new_doc);

        // Fresh DOM for the new state: keep ids for content-matched
        // elements, then fill in the blanks.
        let mut final_doc = new_doc;
        preserve_matched_ids(&inner.doc, &mut final_doc);
        ensure_element_ids(&mut final_doc);
        let final_bytes = final_doc.to_bytes();

        let kind = if inner.wal.is_empty() {
            WalEntryKind::Import
        } else {
            WalEntryKind::ExternalSync
        };
        let description = describe_summary(&diff.summary, uncovered.len());
        let patches_json = serde_json::to_string(&diff.patches)
            .map_err(|e| SessionError::Internal(format!("failed to serialize patches: {e}")))?;
        let meta = SyncMeta::new(
            source.to_string_lossy().into_owned(),
            previous_hash,
            new_hash,
            diff.summary,
            uncovered.clone(),
            &final_bytes,
        );
        let entry = WalEntry::sync(kind, patches_json, description.clone(), meta);

        let _guard = self.store.lock_session(session_id)?;
        self.discard_redo_tail(session_id, &mut inner)?;
        let position = inner.wal.append(&entry.to_line()?)?;
        inner.cursor = position;
        inner.doc = WordDocument::from_bytes(&final_bytes)
            .map_err(|e| SessionError::Internal(format!("reserialized snapshot unreadable: {e}")))?;
        // A sync always forces a checkpoint at the new position.
        self.write_checkpoint(session_id, &mut inner)?;
        self.sync_index_entry(session_id, &inner)?;

        info!(session_id, position, %description, "absorbed external change");
        Ok(SyncResult {
            success: true,
            message: description,
            position: Some(position),
            summary: diff.summary,
            uncovered_changes: uncovered.len(),
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Committing at a cursor short of the tail truncates the WAL there and
    /// drops checkpoints beyond it.
    fn discard_redo_tail(
        &self,
        session_id: &str,
        inner: &mut SessionInner,
    ) -> Result<(), SessionError> {
        if inner.cursor >= inner.wal.len() {
            return Ok(());
        }
        inner.wal.truncate(inner.cursor)?;
        let cursor = inner.cursor;
        let dropped: Vec<u64> = inner
            .checkpoints
            .iter()
            .copied()
            .filter(|&c| c > cursor)
            .collect();
        inner.checkpoints.retain(|&c| c <= cursor);
        for position in dropped {
            self.store.delete_checkpoint(session_id, position)?;
        }
        debug!(session_id, cursor, "truncated redo tail");
        Ok(())
    }

    fn write_checkpoint(
        &self,
        session_id: &str,
        inner: &mut SessionInner,
    ) -> Result<(), SessionError> {
        let cursor = inner.cursor;
        self.store
            .save_checkpoint(session_id, cursor, &inner.doc.to_bytes())?;
        if !inner.checkpoints.contains(&cursor) {
            inner.checkpoints.push(cursor);
            inner.checkpoints.sort_unstable();
        }
        Ok(())
    }

    fn maybe_auto_checkpoint(
        &self,
        session_id: &str,
        inner: &mut SessionInner,
    ) -> Result<(), SessionError> {
        let last = inner
            .checkpoints
            .iter()
            .copied()
            .filter(|&c| c <= inner.cursor)
            .max()
            .unwrap_or(0);
        let since_last = inner.cursor - last;
        let compacting = inner.wal.len() >= self.config.compaction_threshold;
        if since_last >= self.config.checkpoint_interval || compacting {
            self.write_checkpoint(session_id, inner)?;
            if compacting {
                // The newest checkpoint becomes the anchor; older ones go.
                let cursor = inner.cursor;
                let stale: Vec<u64> = inner
                    .checkpoints
                    .iter()
                    .copied()
                    .filter(|&c| c < cursor)
                    .collect();
                inner.checkpoints.retain(|&c| c >= cursor);
                for position in stale {
                    self.store.delete_checkpoint(session_id, position)?;
                }
            }
        }
        Ok(())
    }

    fn rebuild_to(
        &self,
        session_id: &str,
        inner: &mut SessionInner,
        target: u64,
    ) -> Result<u64, SessionError> {
        let (doc, achieved) =
            rehydrate::rebuild(&self.store, session_id, &inner.checkpoints, &inner.wal, target)?;
        inner.doc = doc;
        inner.cursor = achieved;
        self.sync_index_entry(session_id, inner)?;
        Ok(achieved)
    }

    fn sync_index_entry(
        &self,
        session_id: &str,
        inner: &SessionInner,
    ) -> Result<(), SessionError> {
        let source_path = inner
            .source_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let wal_count = inner.wal.len();
        let cursor = inner.cursor;
        let checkpoints = inner.checkpoints.clone();
        let created_at = inner.created_at;
        self.store.update_index(move |index| {
            if let Some(entry) = index.get_mut(session_id) {
                entry.source_path = source_path;
                entry.wal_count = wal_count;
                entry.cursor_position = cursor;
                entry.checkpoint_positions = checkpoints;
                entry.touch();
            } else {
                let mut entry = SessionIndexEntry::new(session_id, source_path);
                entry.created_at = created_at;
                entry.wal_count = wal_count;
                entry.cursor_position = cursor;
                entry.checkpoint_positions = checkpoints;
                index.upsert(entry);
            }
        })
    }
}

/// Carry ids over from `original` onto content-identical elements of `next`
/// that lack one; the ensure pass afterwards only fills what is still
/// missing.
fn preserve_matched_ids(original: &WordDocument, next: &mut WordDocument) {
    use std::collections::HashMap;
    let mut by_fingerprint: HashMap<String, Vec<&BodyChild>> = HashMap::new();
    for child in &original.body.children {
        if let Some(fp) = fingerprint(child) {
            by_fingerprint.entry(fp).or_default().push(child);
        }
    }
    for child in &mut next.body.children {
        if child.element_id().is_some() {
            continue;
        }
        let Some(fp) = fingerprint(child) else {
            continue;
        };
        let Some(pool) = by_fingerprint.get_mut(&fp) else {
            continue;
        };
        if pool.is_empty() {
            continue;
        }
        let donor = pool.remove(0);
        if let Some(id) = donor.element_id().map(str::to_string) {
            set_element_id(child, id);
        }
    }
}

fn set_element_id(child: &mut BodyChild, id: String) {
    match child {
        BodyChild::Paragraph(p) => p.id = Some(id),
        BodyChild::Table(t) => t.id = Some(id),
        BodyChild::Section(s) => s.id = Some(id),
    }
}

fn describe_summary(summary: &ChangeSummary, uncovered: usize) -> String {
    let mut parts = Vec::new();
    if summary.added > 0 {
        parts.push(format!("{} added", summary.added));
    }
    if summary.removed > 0 {
        parts.push(format!("{} removed", summary.removed));
    }
    if summary.modified > 0 {
        parts.push(format!("{} modified", summary.modified));
    }
    if summary.moved > 0 {
        parts.push(format!("{} moved", summary.moved));
    }
    if uncovered > 0 {
        parts.push(format!("{uncovered} outside the body"));
    }
    if parts.is_empty() {
        return "external sync: no body changes".into();
    }
    format!("external sync: {}", parts.join(", "))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SessionError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }
    }
    let temp = path.with_extension("docx.tmp");
    std::fs::write(&temp, bytes)
        .map_err(|e| SessionError::io(format!("failed to write {}", temp.display()), e))?;
    std::fs::rename(&temp, path)
        .map_err(|e| SessionError::io(format!("failed to rename to {}", path.display()), e))?;
    Ok(())
}
