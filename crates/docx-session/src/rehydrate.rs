//! Rebuilding session state from durable artifacts.
//!
//! State at position `p` is the nearest checkpoint at or below `p` with the
//! WAL range `(checkpoint .. p]` replayed on top. Replay never fails the
//! caller: a corrupt or unapplicable entry stops replay with a warning and
//! the achieved position is reported back.

use docx_dom::WordDocument;
use docx_session_core::{SessionError, WalEntry};
use docx_wal::{MappedWal, SessionStore};
use tracing::warn;

/// Load the byte image anchoring `target`: the greatest checkpoint ≤ target,
/// or the baseline. Returns the bytes and the anchor position.
pub fn anchor_bytes(
    store: &SessionStore,
    session_id: &str,
    checkpoints: &[u64],
    target: u64,
) -> Result<(Vec<u8>, u64), SessionError> {
    let anchor = checkpoints
        .iter()
        .copied()
        .filter(|&c| c > 0 && c <= target)
        .max()
        .unwrap_or(0);
    let bytes = if anchor == 0 {
        store.load_baseline(session_id)?
    } else {
        store.load_checkpoint(session_id, anchor)?
    };
    Ok((bytes, anchor))
}

/// Rebuild the document at `target`, returning it with the position actually
/// reached (lower than `target` only when replay hit a corrupt entry).
pub fn rebuild(
    store: &SessionStore,
    session_id: &str,
    checkpoints: &[u64],
    wal: &MappedWal,
    target: u64,
) -> Result<(WordDocument, u64), SessionError> {
    let (bytes, anchor) = anchor_bytes(store, session_id, checkpoints, target)?;
    let mut doc = WordDocument::from_bytes(&bytes).map_err(|e| {
        SessionError::Format(format!("session {session_id} anchor at {anchor} is unreadable: {e}"))
    })?;
    let achieved = replay(&mut doc, wal, anchor, target, session_id);
    Ok((doc, achieved))
}

/// Replay WAL entries `(from .. to]` onto `doc`. Returns the last position
/// applied successfully.
pub fn replay(
    doc: &mut WordDocument,
    wal: &MappedWal,
    from: u64,
    to: u64,
    session_id: &str,
) -> u64 {
    let mut achieved = from;
    let to = to.min(wal.len());
    for index in from..to {
        let position = index + 1;
        let Some(line) = wal.entry(index as usize) else {
            warn!(session_id, position, "skipping unreadable WAL line, stopping replay");
            break;
        };
        let entry = match WalEntry::from_line(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(session_id, position, error = %e, "corrupt WAL entry, stopping replay");
                break;
            }
        };
        if let Err(e) = apply_entry(doc, &entry) {
            warn!(session_id, position, error = %e, "WAL entry failed to apply, stopping replay");
            break;
        }
        achieved = position;
    }
    achieved
}

fn apply_entry(doc: &mut WordDocument, entry: &WalEntry) -> Result<(), SessionError> {
    // Sync entries are self-contained: the snapshot is authoritative and the
    // patches are not re-derived.
    if let Some(meta) = &entry.sync_meta {
        let bytes = meta.snapshot_bytes()?;
        *doc = WordDocument::from_bytes(&bytes)
            .map_err(|e| SessionError::Format(format!("sync snapshot is unreadable: {e}")))?;
        return Ok(());
    }
    let ops = docx_patch::parse_batch(&entry.patches)?;
    docx_patch::apply_batch(doc, &ops)
        .map(|_| ())
        .map_err(docx_patch::PatchError::into_session_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn patch_line(json: &str) -> String {
        WalEntry::patch(json.to_string(), None).to_line().unwrap()
    }

    fn setup() -> (SessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (SessionStore::new(dir.path()), dir)
    }

    #[test]
    fn rebuild_from_baseline_replays_all() {
        let (store, _dir) = setup();
        let doc = WordDocument::new_empty();
        store.save_baseline("s1", &doc.to_bytes()).unwrap();

        let mut wal = MappedWal::open(&store.wal_path("s1")).unwrap();
        wal.append(&patch_line(
            r#"[{"op":"add","path":"/body/children/0","value":{"type":"paragraph","text":"one"}}]"#,
        ))
        .unwrap();
        wal.append(&patch_line(
            r#"[{"op":"add","path":"/body/children/1","value":{"type":"paragraph","text":"two"}}]"#,
        ))
        .unwrap();

        let (rebuilt, achieved) = rebuild(&store, "s1", &[], &wal, 2).unwrap();
        assert_eq!(achieved, 2);
        assert_eq!(rebuilt.body.children.len(), 2);

        // Rebuilding to an earlier position stops earlier.
        let (rebuilt, achieved) = rebuild(&store, "s1", &[], &wal, 1).unwrap();
        assert_eq!(achieved, 1);
        assert_eq!(rebuilt.body.children.len(), 1);
    }

    #[test]
    fn rebuild_prefers_nearest_checkpoint() {
        let (store, _dir) = setup();
        let doc = WordDocument::new_empty();
        store.save_baseline("s1", &doc.to_bytes()).unwrap();

        let mut wal = MappedWal::open(&store.wal_path("s1")).unwrap();
        let batch = r#"[{"op":"add","path":"/body/children/0","value":{"type":"paragraph","text":"p"}}]"#;
        for _ in 0..3 {
            wal.append(&patch_line(batch)).unwrap();
        }
        // Checkpoint at 2 diverges from honest replay so we can tell which
        // anchor was used.
        let mut marked = WordDocument::new_empty();
        marked
            .body
            .children
            .push(docx_dom::BodyChild::Paragraph(docx_dom::Paragraph::with_text(
                "from checkpoint",
            )));
        store.save_checkpoint("s1", 2, &marked.to_bytes()).unwrap();

        let (rebuilt, achieved) = rebuild(&store, "s1", &[2], &wal, 3).unwrap();
        assert_eq!(achieved, 3);
        // Anchor was the checkpoint: one replayed entry on top of the marker.
        assert_eq!(rebuilt.body.children.len(), 2);
    }

    #[test]
    fn replay_is_pure() {
        let (store, _dir) = setup();
        let doc = WordDocument::new_empty();
        store.save_baseline("s1", &doc.to_bytes()).unwrap();

        let mut wal = MappedWal::open(&store.wal_path("s1")).unwrap();
        for n in 0..4 {
            wal.append(&patch_line(&format!(
                r#"[{{"op":"add","path":"/body/children/{n}","value":{{"type":"paragraph","text":"p{n}"}}}}]"#
            )))
            .unwrap();
        }

        let (a, _) = rebuild(&store, "s1", &[], &wal, 4).unwrap();
        let (b, _) = rebuild(&store, "s1", &[], &wal, 4).unwrap();
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn corrupt_line_stops_replay_without_failing() {
        let (store, _dir) = setup();
        let doc = WordDocument::new_empty();
        store.save_baseline("s1", &doc.to_bytes()).unwrap();

        let mut wal = MappedWal::open(&store.wal_path("s1")).unwrap();
        wal.append(&patch_line(
            r#"[{"op":"add","path":"/body/children/0","value":{"type":"paragraph","text":"good"}}]"#,
        ))
        .unwrap();
        wal.append("this is not json").unwrap();
        wal.append(&patch_line(
            r#"[{"op":"add","path":"/body/children/1","value":{"type":"paragraph","text":"unreached"}}]"#,
        ))
        .unwrap();

        let (rebuilt, achieved) = rebuild(&store, "s1", &[], &wal, 3).unwrap();
        assert_eq!(achieved, 1);
        assert_eq!(rebuilt.body.children.len(), 1);
    }

    #[test]
    fn sync_entry_snapshot_is_authoritative() {
        let (store, _dir) = setup();
        let doc = WordDocument::new_empty();
        store.save_baseline("s1", &doc.to_bytes()).unwrap();

        let mut snapshot_doc = WordDocument::new_empty();
        snapshot_doc
            .body
            .children
            .push(docx_dom::BodyChild::Paragraph(docx_dom::Paragraph::with_text(
                "from snapshot",
            )));
        let meta = docx_session_core::SyncMeta::new(
            "/tmp/source.docx",
            "00".repeat(32),
            "11".repeat(32),
            docx_session_core::ChangeSummary::default(),
            vec![],
            &snapshot_doc.to_bytes(),
        );
        let entry = WalEntry::sync(
            docx_session_core::WalEntryKind::ExternalSync,
            // Patches that would fail if replayed literally; the snapshot wins.
            r#"[{"op":"remove","path":"/body/paragraph[99]"}]"#.to_string(),
            "external sync".to_string(),
            meta,
        );

        let mut wal = MappedWal::open(&store.wal_path("s1")).unwrap();
        wal.append(&entry.to_line().unwrap()).unwrap();

        let (rebuilt, achieved) = rebuild(&store, "s1", &[], &wal, 1).unwrap();
        assert_eq!(achieved, 1);
        assert_eq!(rebuilt.body.children.len(), 1);
    }
}
