//! Durable per-session artifacts.
//!
//! The sessions directory holds, per session id:
//!
//! ```text
//! <id>.docx            baseline (framed)
//! <id>.wal             memory-mapped append log
//! <id>.ckpt.<pos>.docx checkpoint at WAL position <pos> (framed)
//! <id>.lock            advisory lock for cross-process mutation
//! index.json           process-wide session index
//! index.lock           advisory lock guarding index rewrites
//! ```
//!
//! All I/O here is synchronous; callers treat these operations as blocking.

mod framed;
mod lock;
mod mapped;
mod store;

pub use framed::{read_framed, write_framed};
pub use lock::SessionLockGuard;
pub use mapped::MappedWal;
pub use store::SessionStore;
