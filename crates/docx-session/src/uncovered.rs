//! Detection of changes outside the main document body.
//!
//! Parts are compared by URI and content hash. These changes ride along in
//! sync results for visibility; propagation happens through the full
//! snapshot, never through body patches.

use std::collections::BTreeMap;

use docx_dom::WordDocument;
use docx_session_core::UncoveredChange;

use crate::fingerprint::file_hash;

/// Classify a part URI into the taxonomy carried on uncovered changes.
fn part_kind(uri: &str) -> &'static str {
    if uri.starts_with("word/header") {
        "header"
    } else if uri.starts_with("word/footer") {
        "footer"
    } else if uri.starts_with("word/media/") {
        "media"
    } else if uri == "word/styles.xml" {
        "styles"
    } else if uri == "word/numbering.xml" {
        "numbering"
    } else if uri.starts_with("docProps/") {
        "core_properties"
    } else if uri.starts_with("word/embeddings/") {
        "embedded"
    } else {
        "part"
    }
}

/// Compare every part except the main document part between two documents.
pub fn diff_uncovered(original: &WordDocument, modified: &WordDocument) -> Vec<UncoveredChange> {
    let collect = |doc: &WordDocument| -> BTreeMap<String, String> {
        doc.auxiliary_parts()
            .into_iter()
            .filter(|(uri, _)| uri != "[Content_Types].xml")
            .map(|(uri, data)| (uri, file_hash(&data)))
            .collect()
    };
    let before = collect(original);
    let after = collect(modified);

    let mut changes = Vec::new();
    for (uri, hash) in &before {
        match after.get(uri) {
            None => changes.push(UncoveredChange {
                change_kind: "removed".into(),
                part_kind: part_kind(uri).into(),
                part_uri: uri.clone(),
                description: format!("{} part {uri} was removed", part_kind(uri)),
            }),
            Some(new_hash) if new_hash != hash => changes.push(UncoveredChange {
                change_kind: "modified".into(),
                part_kind: part_kind(uri).into(),
                part_uri: uri.clone(),
                description: format!("{} part {uri} was modified", part_kind(uri)),
            }),
            Some(_) => {}
        }
    }
    for uri in after.keys() {
        if !before.contains_key(uri) {
            changes.push(UncoveredChange {
                change_kind: "added".into(),
                part_kind: part_kind(uri).into(),
                part_uri: uri.clone(),
                description: format!("{} part {uri} was added", part_kind(uri)),
            });
        }
    }
    changes
}
