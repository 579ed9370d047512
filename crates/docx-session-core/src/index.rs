use serde::{Deserialize, Serialize};

/// Current index schema version.
pub const INDEX_VERSION: u32 = 1;

/// The process-wide session index, persisted as `index.json` in the sessions
/// directory. The on-disk copy always references files that exist on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndex {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<SessionIndexEntry>,
}

fn default_version() -> u32 {
    INDEX_VERSION
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            sessions: Vec::new(),
        }
    }
}

impl SessionIndex {
    pub fn get(&self, session_id: &str) -> Option<&SessionIndexEntry> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionIndexEntry> {
        self.sessions.iter_mut().find(|s| s.id == session_id)
    }

    /// Find the session whose source path equals `path`, if any.
    pub fn by_source_path(&self, path: &str) -> Option<&SessionIndexEntry> {
        self.sessions
            .iter()
            .find(|s| s.source_path.as_deref() == Some(path))
    }

    /// Insert or update a session entry.
    pub fn upsert(&mut self, entry: SessionIndexEntry) {
        if let Some(existing) = self.get_mut(&entry.id) {
            *existing = entry;
        } else {
            self.sessions.push(entry);
        }
    }

    pub fn remove(&mut self, session_id: &str) -> Option<SessionIndexEntry> {
        let pos = self.sessions.iter().position(|s| s.id == session_id)?;
        Some(self.sessions.remove(pos))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == session_id)
    }
}

/// One session's row in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndexEntry {
    pub id: String,
    pub source_path: Option<String>,
    /// Write the document back to its source after each edit.
    #[serde(default)]
    pub auto_sync: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(alias = "modified_at")]
    pub last_modified_at: chrono::DateTime<chrono::Utc>,
    /// Baseline file name, e.g. `abc123.docx`.
    #[serde(default)]
    pub docx_file: Option<String>,
    /// Number of entries in the WAL.
    #[serde(default)]
    pub wal_count: u64,
    #[serde(default)]
    pub cursor_position: u64,
    /// Sorted ascending.
    #[serde(default)]
    pub checkpoint_positions: Vec<u64>,
}

impl SessionIndexEntry {
    pub fn new(id: impl Into<String>, source_path: Option<String>) -> Self {
        let id = id.into();
        let now = chrono::Utc::now();
        Self {
            docx_file: Some(format!("{id}.docx")),
            id,
            source_path,
            auto_sync: false,
            created_at: now,
            last_modified_at: now,
            wal_count: 0,
            cursor_position: 0,
            checkpoint_positions: Vec::new(),
        }
    }

    /// The greatest checkpoint position at or below `position`, if any.
    pub fn nearest_checkpoint(&self, position: u64) -> Option<u64> {
        self.checkpoint_positions
            .iter()
            .copied()
            .filter(|&p| p <= position)
            .max()
    }

    pub fn record_checkpoint(&mut self, position: u64) {
        if !self.checkpoint_positions.contains(&position) {
            self.checkpoint_positions.push(position);
            self.checkpoint_positions.sort_unstable();
        }
    }

    /// Drop checkpoint records strictly beyond `position`, returning the
    /// dropped positions so callers can delete the files.
    pub fn drop_checkpoints_beyond(&mut self, position: u64) -> Vec<u64> {
        let (keep, drop): (Vec<u64>, Vec<u64>) = self
            .checkpoint_positions
            .iter()
            .copied()
            .partition(|&p| p <= position);
        self.checkpoint_positions = keep;
        drop
    }

    pub fn touch(&mut self) {
        self.last_modified_at = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing() {
        let mut index = SessionIndex::default();
        index.upsert(SessionIndexEntry::new("s1", None));
        let mut updated = SessionIndexEntry::new("s1", Some("/tmp/a.docx".into()));
        updated.wal_count = 4;
        index.upsert(updated);

        assert_eq!(index.sessions.len(), 1);
        assert_eq!(index.get("s1").unwrap().wal_count, 4);
    }

    #[test]
    fn lookup_by_source_path() {
        let mut index = SessionIndex::default();
        index.upsert(SessionIndexEntry::new("s1", Some("/tmp/a.docx".into())));
        index.upsert(SessionIndexEntry::new("s2", None));

        assert_eq!(index.by_source_path("/tmp/a.docx").unwrap().id, "s1");
        assert!(index.by_source_path("/tmp/b.docx").is_none());
    }

    #[test]
    fn nearest_checkpoint_respects_bound() {
        let mut entry = SessionIndexEntry::new("s1", None);
        entry.record_checkpoint(10);
        entry.record_checkpoint(3);
        entry.record_checkpoint(7);

        assert_eq!(entry.checkpoint_positions, vec![3, 7, 10]);
        assert_eq!(entry.nearest_checkpoint(9), Some(7));
        assert_eq!(entry.nearest_checkpoint(2), None);
        assert_eq!(entry.nearest_checkpoint(10), Some(10));
    }

    #[test]
    fn drop_checkpoints_beyond_cursor() {
        let mut entry = SessionIndexEntry::new("s1", None);
        for p in [2, 5, 9] {
            entry.record_checkpoint(p);
        }
        let dropped = entry.drop_checkpoints_beyond(5);
        assert_eq!(dropped, vec![9]);
        assert_eq!(entry.checkpoint_positions, vec![2, 5]);
    }

    #[test]
    fn tolerates_legacy_field_names() {
        let json = r#"{
            "version": 1,
            "sessions": [{
                "id": "s1",
                "source_path": null,
                "created_at": "2026-01-05T10:00:00Z",
                "modified_at": "2026-01-05T11:00:00Z"
            }]
        }"#;
        let index: SessionIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.get("s1").unwrap().cursor_position, 0);
    }
}
