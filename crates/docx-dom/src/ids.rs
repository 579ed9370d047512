//! Element identity pass.
//!
//! Every patchable element carries a short stable id in the private
//! namespace. Ids are assigned only where missing, so an element keeps its
//! id across edits, reserializations, and external syncs.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::model::{BodyChild, Inline, WordDocument};

const ID_LEN: usize = 8;

/// A collision-resistant random short id.
pub fn new_element_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// Assign random ids to every patchable element that lacks one, across the
/// body and all header/footer parts. Returns the number of ids assigned.
pub fn ensure_element_ids(doc: &mut WordDocument) -> usize {
    ensure_element_ids_with(doc, &mut new_element_id)
}

/// Like [`ensure_element_ids`], drawing ids from the caller's source.
/// Replay paths use a deterministic source so that rebuilding the same
/// state twice yields byte-identical serializations.
pub fn ensure_element_ids_with(
    doc: &mut WordDocument,
    next_id: &mut dyn FnMut() -> String,
) -> usize {
    let mut assigned = 0;
    for child in &mut doc.body.children {
        ensure_block(child, next_id, &mut assigned);
    }
    for part in doc.headers.iter_mut().chain(doc.footers.iter_mut()) {
        for block in &mut part.blocks {
            ensure_block(block, next_id, &mut assigned);
        }
    }
    assigned
}

fn ensure_slot(slot: &mut Option<String>, next_id: &mut dyn FnMut() -> String, assigned: &mut usize) {
    if slot.is_none() {
        *slot = Some(next_id());
        *assigned += 1;
    }
}

fn ensure_block(child: &mut BodyChild, next_id: &mut dyn FnMut() -> String, assigned: &mut usize) {
    match child {
        BodyChild::Paragraph(p) => {
            ensure_slot(&mut p.id, next_id, assigned);
            for inline in &mut p.children {
                match inline {
                    Inline::Run(r) => ensure_slot(&mut r.id, next_id, assigned),
                    Inline::Hyperlink(h) => {
                        ensure_slot(&mut h.id, next_id, assigned);
                        for r in &mut h.runs {
                            ensure_slot(&mut r.id, next_id, assigned);
                        }
                    }
                    Inline::Drawing(d) => ensure_slot(&mut d.id, next_id, assigned),
                    Inline::Bookmark(b) => ensure_slot(&mut b.id, next_id, assigned),
                }
            }
        }
        BodyChild::Table(t) => {
            ensure_slot(&mut t.id, next_id, assigned);
            for row in &mut t.rows {
                ensure_slot(&mut row.id, next_id, assigned);
                for cell in &mut row.cells {
                    ensure_slot(&mut cell.id, next_id, assigned);
                    for block in &mut cell.blocks {
                        ensure_block(block, next_id, assigned);
                    }
                }
            }
        }
        BodyChild::Section(s) => ensure_slot(&mut s.id, next_id, assigned),
    }
}
