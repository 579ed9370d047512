//! OOXML word-processing DOM collaborator.
//!
//! The session core consumes documents exclusively through this crate's
//! surface: open-from-bytes, create-empty, save-to-bytes, typed access to the
//! body tree, part access by URI, and the private element-id attribute pass.
//!
//! The container is an OPC zip with stored (uncompressed) entries; the main
//! document part is WordprocessingML. Hyperlink targets and drawing media
//! references are carried as attributes in the same private namespace as
//! element ids, so the tree stays strictly hierarchical.

mod error;
mod ids;
mod model;
mod package;
mod xml;

pub use error::DomError;
pub use ids::{ensure_element_ids, ensure_element_ids_with, new_element_id};
pub use model::{
    Body, BodyChild, Drawing, HdrFtrKind, HeaderFooter, Hyperlink, Inline, Paragraph, Run,
    RunProps, SectionBreak, Table, TableCell, TableRow, WordDocument, IdMode, CORE_PROPS_URI,
    MAIN_PART_URI, STYLES_URI,
};
pub use package::{Package, Part};
