//! Shared types for the docx-session workspace.
//!
//! This crate defines what every other layer agrees on:
//! - `SessionError`: the error taxonomy surfaced to front-ends
//! - `SessionConfig`: constructed configuration (environment is read once, at start-up)
//! - `WalEntry` / `SyncMeta`: the on-disk JSON shape of write-ahead log entries
//! - `SessionIndex`: the process-wide session index

mod config;
mod error;
mod index;
mod wal;

pub use config::SessionConfig;
pub use error::SessionError;
pub use index::{SessionIndex, SessionIndexEntry, INDEX_VERSION};
pub use wal::{ChangeSummary, SyncMeta, UncoveredChange, WalEntry, WalEntryKind};
