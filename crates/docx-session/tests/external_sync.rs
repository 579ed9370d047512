//! External change reconciliation: diffing, sync entries, id stability,
//! and the file watcher.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use docx_dom::{BodyChild, Inline, WordDocument};
use docx_session::{ExternalChangeTracker, SessionManager};
use docx_session_core::{SessionConfig, WalEntry, WalEntryKind};

fn manager_in(dir: &TempDir) -> Arc<SessionManager> {
    let config = SessionConfig {
        sessions_dir: Some(dir.path().to_path_buf()),
        watch_debounce_ms: 100,
        ..Default::default()
    };
    Arc::new(SessionManager::new(config).unwrap())
}

/// Write a starter document with one paragraph to `path`.
fn seed_file(path: &std::path::Path, text: &str) {
    let mut doc = WordDocument::new_empty();
    doc.body
        .children
        .push(BodyChild::Paragraph(docx_dom::Paragraph::with_text(text)));
    std::fs::write(path, doc.to_bytes()).unwrap();
}

/// Rewrite the first paragraph's text in a serialized document, leaving
/// everything else (ids included) untouched.
fn rewrite_first_paragraph(bytes: &[u8], new_text: &str) -> Vec<u8> {
    let mut doc = WordDocument::from_bytes(bytes).unwrap();
    let Some(BodyChild::Paragraph(p)) = doc.body.children.first_mut() else {
        panic!("expected a leading paragraph");
    };
    let Some(Inline::Run(run)) = p.children.first_mut() else {
        panic!("expected a run");
    };
    run.text = new_text.to_string();
    doc.to_bytes()
}

#[tokio::test]
async fn sync_absorbs_external_edit_as_one_entry() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("report.docx");
    seed_file(&source, "original opening");
    let id = manager.open(Some(&source)).await.unwrap();

    for n in 0..3 {
        manager
            .apply_patch_json(
                &id,
                &format!(
                    r#"[{{"op":"add","path":"/body/children/{}","value":{{"type":"paragraph","text":"edit {n}"}}}}]"#,
                    n + 1
                ),
            )
            .await
            .unwrap();
    }
    let session = manager.get(&id).unwrap();
    assert_eq!(session.cursor().await, 3);

    // Overwrite the source: same content except the first paragraph.
    let modified = rewrite_first_paragraph(&session.document_bytes().await, "NEW");
    std::fs::write(&source, &modified).unwrap();

    let result = manager.sync_external(&id).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.position, Some(4));
    assert_eq!(result.summary.modified, 1);
    assert_eq!(result.summary.added, 0);
    assert_eq!(result.summary.removed, 0);
    assert_eq!(result.summary.moved, 0);
    assert_eq!(session.cursor().await, 4);

    // The entry is self-contained: kind, patches, and snapshot.
    assert_eq!(session.wal_len().await, 4);
    let line = {
        let store = manager.store();
        let wal_file = docx_wal::MappedWal::open(&store.wal_path(&id)).unwrap();
        wal_file.entry(3).unwrap().to_string()
    };
    let entry = WalEntry::from_line(&line).unwrap();
    assert_eq!(entry.entry_type, WalEntryKind::ExternalSync);
    let meta = entry.sync_meta.expect("sync entry carries sync_meta");
    assert!(!meta.document_snapshot.is_empty());
    assert_eq!(meta.summary.modified, 1);
    assert_ne!(meta.previous_hash, meta.new_hash);

    // Rebuilding from the baseline through the sync entry reproduces the
    // synced state exactly.
    manager.jump_to(&id, 0).await.unwrap();
    manager.redo(&id, 4).await.unwrap();
    assert_eq!(
        session.query_text("/body/paragraph[0]").await.unwrap(),
        "NEW"
    );
    assert_eq!(session.document_bytes().await, meta.snapshot_bytes().unwrap());
}

#[tokio::test]
async fn sync_twice_without_change_appends_once() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("doc.docx");
    seed_file(&source, "steady");
    let id = manager.open(Some(&source)).await.unwrap();
    let session = manager.get(&id).unwrap();

    let modified = rewrite_first_paragraph(&session.document_bytes().await, "changed once");
    std::fs::write(&source, &modified).unwrap();

    let first = manager.sync_external(&id).await;
    assert!(first.success);
    assert_eq!(session.wal_len().await, 1);

    let second = manager.sync_external(&id).await;
    assert!(second.success);
    assert!(second.position.is_none(), "no entry for an unchanged file");
    assert_eq!(session.wal_len().await, 1);
}

#[tokio::test]
async fn first_sync_on_empty_wal_is_an_import() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("doc.docx");
    seed_file(&source, "first version");
    let id = manager.open(Some(&source)).await.unwrap();

    let session = manager.get(&id).unwrap();
    let modified = rewrite_first_paragraph(&session.document_bytes().await, "second version");
    std::fs::write(&source, &modified).unwrap();

    let result = manager.sync_external(&id).await;
    assert!(result.success);

    let line = {
        let wal_file = docx_wal::MappedWal::open(&manager.store().wal_path(&id)).unwrap();
        wal_file.entry(0).unwrap().to_string()
    };
    let entry = WalEntry::from_line(&line).unwrap();
    assert_eq!(entry.entry_type, WalEntryKind::Import);
}

#[tokio::test]
async fn id_only_rewrites_do_not_sync() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("doc.docx");
    seed_file(&source, "content stays");
    let id = manager.open(Some(&source)).await.unwrap();
    let session = manager.get(&id).unwrap();

    // Strip every id and let fresh ones be assigned: content-identical.
    let mut stripped = WordDocument::from_bytes(&session.document_bytes().await).unwrap();
    for child in &mut stripped.body.children {
        if let BodyChild::Paragraph(p) = child {
            p.id = None;
            for inline in &mut p.children {
                if let Inline::Run(r) = inline {
                    r.id = None;
                }
            }
        }
    }
    docx_dom::ensure_element_ids(&mut stripped);
    std::fs::write(&source, stripped.to_bytes()).unwrap();

    let result = manager.sync_external(&id).await;
    assert!(result.success);
    assert!(result.position.is_none());
    assert_eq!(session.wal_len().await, 0);
}

#[tokio::test]
async fn ids_survive_sync_for_unchanged_elements() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("doc.docx");
    seed_file(&source, "keeper paragraph");
    let id = manager.open(Some(&source)).await.unwrap();
    let session = manager.get(&id).unwrap();

    let keeper_id = session
        .with_document(|doc| doc.body.children[0].element_id().map(str::to_string))
        .await
        .expect("open assigns ids");

    // The external edit rewrites the file from scratch: same keeper text,
    // one new paragraph, no ids anywhere.
    let mut external = WordDocument::new_empty();
    external
        .body
        .children
        .push(BodyChild::Paragraph(docx_dom::Paragraph::with_text(
            "keeper paragraph",
        )));
    external
        .body
        .children
        .push(BodyChild::Paragraph(docx_dom::Paragraph::with_text(
            "added outside",
        )));
    std::fs::write(&source, external.to_bytes()).unwrap();

    let result = manager.sync_external(&id).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.summary.added, 1);

    let post_sync_id = session
        .with_document(|doc| doc.body.children[0].element_id().map(str::to_string))
        .await;
    assert_eq!(post_sync_id.as_deref(), Some(keeper_id.as_str()));
}

#[tokio::test]
async fn sync_failure_leaves_session_unchanged() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("doc.docx");
    seed_file(&source, "intact");
    let id = manager.open(Some(&source)).await.unwrap();
    let session = manager.get(&id).unwrap();
    let before = session.document_bytes().await;

    std::fs::write(&source, b"garbage that is not a package").unwrap();

    let result = manager.sync_external(&id).await;
    assert!(!result.success);
    assert!(result.message.contains("not a well-formed"));
    assert_eq!(session.wal_len().await, 0);
    assert_eq!(session.document_bytes().await, before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watcher_parks_a_pending_change() {
    let sessions = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    let manager = manager_in(&sessions);

    let source = files.path().join("watched.docx");
    seed_file(&source, "watched content");
    let id = manager.open(Some(&source)).await.unwrap();
    let session = manager.get(&id).unwrap();

    let tracker = ExternalChangeTracker::new(Arc::clone(&manager));
    tracker.start_watching(&id).await.unwrap();

    // Let the watcher settle, then modify the file.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let modified = rewrite_first_paragraph(&session.document_bytes().await, "watched and changed");
    std::fs::write(&source, &modified).unwrap();

    // Wait past the debounce window for the evaluation to land.
    let mut pending = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(p) = tracker.check(&id) {
            pending = Some(p);
            break;
        }
    }
    let pending = pending.expect("watcher should detect the modification");
    assert_eq!(pending.session_id, id);
    assert_eq!(pending.summary.modified, 1);
    assert!(!pending.acknowledged);

    // Acknowledge marks it seen without applying.
    assert!(tracker.acknowledge(&id));
    assert!(tracker.check(&id).unwrap().acknowledged);
    assert_eq!(session.wal_len().await, 0);

    // Sync applies it and clears the pending record.
    let result = tracker.sync(&id).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(session.wal_len().await, 1);
    assert!(tracker.check(&id).is_none());
    assert_eq!(
        session.query_text("/body/paragraph[0]").await.unwrap(),
        "watched and changed"
    );

    tracker.stop_watching(&id);
}
