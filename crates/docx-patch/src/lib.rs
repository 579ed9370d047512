//! Typed paths and patch execution for docx-session.
//!
//! A path like `/body/table[id='k3xg71ab']/row[-1]/cell[0]` is parsed
//! (`path`), checked against the nesting schema (`schema`), and resolved to
//! an address in the owned document tree (`resolve`). The engine (`engine`)
//! executes patch batches atomically against that tree, materializing typed
//! values (`value`) into DOM subtrees.

mod engine;
mod path;
mod resolve;
mod schema;
mod value;

pub use engine::{apply_batch, dry_run, parse_batch, query, query_text, PatchError, PatchOp};
pub use path::{parse_path, Segment, SegmentKind, Selector, TypedPath};
pub use resolve::{node_at, resolve, ElementLoc, LocRoot, NodeRef, Resolution};
pub use schema::{allowed_children, validate};
pub use value::{materialize, PatchValue, StylePatch};
