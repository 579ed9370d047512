use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Discriminator for WAL entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryKind {
    /// An applied patch batch.
    Patch,
    /// An absorbed out-of-band file modification.
    ExternalSync,
    /// The first sync performed by a tracker on a session with an empty WAL.
    /// Replays identically to `ExternalSync`; the distinction is provenance only.
    Import,
}

impl WalEntryKind {
    pub fn is_sync(self) -> bool {
        matches!(self, Self::ExternalSync | Self::Import)
    }
}

/// One line of the write-ahead log.
///
/// `patches` holds the canonical serialized JSON array of the applied batch.
/// Unknown fields found on disk are preserved across rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub entry_type: WalEntryKind,
    pub patches: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Present only for `external_sync` / `import` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_meta: Option<SyncMeta>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WalEntry {
    /// A plain patch entry stamped with the current time.
    pub fn patch(patches: String, description: Option<String>) -> Self {
        Self {
            entry_type: WalEntryKind::Patch,
            patches,
            timestamp: chrono::Utc::now(),
            description,
            sync_meta: None,
            extra: serde_json::Map::new(),
        }
    }

    /// A sync entry carrying its self-contained snapshot.
    pub fn sync(
        kind: WalEntryKind,
        patches: String,
        description: String,
        sync_meta: SyncMeta,
    ) -> Self {
        debug_assert!(kind.is_sync());
        Self {
            entry_type: kind,
            patches,
            timestamp: chrono::Utc::now(),
            description: Some(description),
            sync_meta: Some(sync_meta),
            extra: serde_json::Map::new(),
        }
    }

    pub fn to_line(&self) -> Result<String, SessionError> {
        serde_json::to_string(self)
            .map_err(|e| SessionError::Internal(format!("failed to serialize WAL entry: {e}")))
    }

    pub fn from_line(line: &str) -> Result<Self, SessionError> {
        serde_json::from_str(line)
            .map_err(|e| SessionError::Parse(format!("malformed WAL entry: {e}")))
    }
}

/// Counts of body-level changes detected by a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub moved: usize,
    pub total_changes: usize,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }
}

/// A change outside the main document body, carried for visibility but not
/// representable as a body patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncoveredChange {
    /// One of `added`, `removed`, `modified`.
    pub change_kind: String,
    /// Part category: `header`, `footer`, `media`, `styles`, `numbering`,
    /// `core_properties`, `embedded`.
    #[serde(rename = "type")]
    pub part_kind: String,
    pub part_uri: String,
    pub description: String,
}

/// Sync provenance attached to `external_sync` / `import` entries.
///
/// The embedded snapshot is authoritative: replaying through a sync entry
/// loads the snapshot rather than re-deriving state from the patches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMeta {
    pub source_path: String,
    pub previous_hash: String,
    pub new_hash: String,
    pub summary: ChangeSummary,
    #[serde(default)]
    pub uncovered_changes: Vec<UncoveredChange>,
    /// Full document bytes at this sync point, base64-encoded.
    pub document_snapshot: String,
}

impl SyncMeta {
    pub fn new(
        source_path: impl Into<String>,
        previous_hash: impl Into<String>,
        new_hash: impl Into<String>,
        summary: ChangeSummary,
        uncovered_changes: Vec<UncoveredChange>,
        snapshot: &[u8],
    ) -> Self {
        Self {
            source_path: source_path.into(),
            previous_hash: previous_hash.into(),
            new_hash: new_hash.into(),
            summary,
            uncovered_changes,
            document_snapshot: BASE64.encode(snapshot),
        }
    }

    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, SessionError> {
        BASE64.decode(&self.document_snapshot).map_err(|e| {
            SessionError::Format(format!("sync entry carries an undecodable snapshot: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_entry_round_trips() {
        let entry = WalEntry::patch(r#"[{"op":"remove","path":"/body/paragraph[0]"}]"#.into(), None);
        let line = entry.to_line().unwrap();
        let parsed = WalEntry::from_line(&line).unwrap();
        assert_eq!(parsed.entry_type, WalEntryKind::Patch);
        assert_eq!(parsed.patches, entry.patches);
        assert!(parsed.sync_meta.is_none());
    }

    #[test]
    fn unknown_fields_survive_rewrite() {
        let line = r#"{"entry_type":"patch","patches":"[]","timestamp":"2026-01-05T10:00:00Z","agent":"writer-7"}"#;
        let entry = WalEntry::from_line(line).unwrap();
        assert_eq!(entry.extra.get("agent").unwrap(), "writer-7");
        let rewritten = entry.to_line().unwrap();
        assert!(rewritten.contains("writer-7"));
    }

    #[test]
    fn sync_meta_snapshot_round_trips() {
        let meta = SyncMeta::new(
            "/tmp/report.docx",
            "aa".repeat(32),
            "bb".repeat(32),
            ChangeSummary {
                modified: 1,
                total_changes: 1,
                ..Default::default()
            },
            vec![],
            b"PK\x03\x04snapshot",
        );
        assert_eq!(meta.snapshot_bytes().unwrap(), b"PK\x03\x04snapshot");
    }

    #[test]
    fn sync_kind_names_are_snake_case() {
        let json = serde_json::to_string(&WalEntryKind::ExternalSync).unwrap();
        assert_eq!(json, r#""external_sync""#);
    }
}
