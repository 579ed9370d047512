use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Configuration for the document session core.
///
/// Environment variables are read once, when the binary parses its arguments;
/// the library layers only ever see a constructed value.
#[derive(Parser, Debug, Clone)]
#[command(name = "docx-sessiond")]
#[command(about = "Document session daemon: restores sessions and watches their sources")]
pub struct SessionConfig {
    /// Root directory holding index.json and per-session artifacts
    #[arg(long, env = "DOCX_SESSIONS_DIR")]
    pub sessions_dir: Option<PathBuf>,

    /// WAL entries between automatic checkpoints
    #[arg(long, default_value_t = 10, env = "DOCX_CHECKPOINT_INTERVAL")]
    pub checkpoint_interval: u64,

    /// Total WAL entries before forced compaction
    #[arg(long, default_value_t = 50, env = "DOCX_WAL_COMPACTION_THRESHOLD")]
    pub compaction_threshold: u64,

    /// Write the document back to its source path after each successful edit
    #[arg(long, default_value_t = false, env = "DOCX_AUTO_SAVE")]
    pub auto_save: bool,

    /// Enable diagnostic tracing to stderr
    #[arg(long, default_value_t = false, env = "DOCX_DEBUG")]
    pub debug: bool,

    /// Debounce window for external file-change events, in milliseconds
    #[arg(long, default_value_t = 500, env = "DOCX_WATCH_DEBOUNCE_MS")]
    pub watch_debounce_ms: u64,

    /// Similarity threshold for fuzzy diff matching, in [0, 1]
    #[arg(long, default_value_t = 0.6, env = "DOCX_DIFF_SIMILARITY")]
    pub similarity_threshold: f64,
}

impl SessionConfig {
    /// The effective sessions root, falling back to the platform data dir.
    pub fn effective_sessions_dir(&self) -> PathBuf {
        self.sessions_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docx-session")
                .join("sessions")
        })
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sessions_dir: None,
            checkpoint_interval: 10,
            compaction_threshold: 50,
            auto_save: false,
            debug: false,
            watch_debounce_ms: 500,
            similarity_threshold: 0.6,
        }
    }
}
