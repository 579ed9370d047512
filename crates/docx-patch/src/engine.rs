//! Patch execution.
//!
//! Operations form a closed sum type keyed on the `op` discriminator. A
//! batch is atomic: it runs against a working copy of the document and the
//! copy is swapped in only when every operation succeeded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use docx_dom::{ensure_element_ids_with, BodyChild, IdMode, Inline, Run, WordDocument};
use docx_session_core::SessionError;

use crate::path::parse_path;
use crate::resolve::{
    container_blocks_mut, node_at, node_at_mut, resolve, ElementLoc, NodeMut, NodeRef, Resolution,
};
use crate::schema;
use crate::value::{materialize, PatchValue, StylePatch};

fn default_max_count() -> usize {
    1
}

/// One patch operation, as carried in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    Add {
        path: String,
        value: PatchValue,
    },
    /// `value` is interpreted against the resolved target: a tagged
    /// [`PatchValue`] for elements, a bare style object for `/style` facets.
    Replace {
        path: String,
        value: serde_json::Value,
    },
    Remove {
        path: String,
    },
    Move {
        from: String,
        path: String,
    },
    Copy {
        from: String,
        path: String,
    },
    ReplaceText {
        path: String,
        find: String,
        replace: String,
        #[serde(default = "default_max_count")]
        max_count: usize,
    },
    RemoveColumn {
        path: String,
        column: usize,
    },
}

impl PatchOp {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Replace { .. } => "replace",
            Self::Remove { .. } => "remove",
            Self::Move { .. } => "move",
            Self::Copy { .. } => "copy",
            Self::ReplaceText { .. } => "replace_text",
            Self::RemoveColumn { .. } => "remove_column",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path }
            | Self::Move { path, .. }
            | Self::Copy { path, .. }
            | Self::ReplaceText { path, .. }
            | Self::RemoveColumn { path, .. } => path,
        }
    }
}

/// A batch failure, pointing at the zero-based index of the offending patch.
#[derive(Debug)]
pub struct PatchError {
    pub index: usize,
    pub source: SessionError,
}

impl PatchError {
    pub fn into_session_error(self) -> SessionError {
        let Self { index, source } = self;
        match source {
            SessionError::Parse(m) => SessionError::Parse(format!("patch {index}: {m}")),
            SessionError::Schema(m) => SessionError::Schema(format!("patch {index}: {m}")),
            SessionError::Resolve {
                path,
                detail,
                ambiguous,
            } => SessionError::Resolve {
                path,
                detail: format!("patch {index}: {detail}"),
                ambiguous,
            },
            SessionError::Io(m) => SessionError::Io(format!("patch {index}: {m}")),
            other => other,
        }
    }
}

/// Parse a JSON patch batch. Every item must carry a valid `op`
/// discriminator and its op-specific required fields.
pub fn parse_batch(json: &str) -> Result<Vec<PatchOp>, SessionError> {
    serde_json::from_str(json)
        .map_err(|e| SessionError::Parse(format!("invalid patch batch: {e}")))
}

/// Apply a batch atomically. On success the document is updated, missing
/// element ids are assigned, and the canonical JSON of the batch is
/// returned for the WAL record.
pub fn apply_batch(doc: &mut WordDocument, ops: &[PatchOp]) -> Result<String, PatchError> {
    let canonical = serde_json::to_string(ops).map_err(|e| PatchError {
        index: 0,
        source: SessionError::Internal(format!("failed to serialize batch: {e}")),
    })?;

    // Ids for freshly created elements derive from the pre-apply state and
    // the batch, so replaying the same entry over the same state assigns the
    // same ids and rebuilds are byte-identical.
    let seed: [u8; 32] = {
        let mut hasher = Sha256::new();
        hasher.update(doc.main_part_xml(IdMode::Keep).as_bytes());
        hasher.update(canonical.as_bytes());
        hasher.finalize().into()
    };

    let mut work = doc.clone();
    for (index, op) in ops.iter().enumerate() {
        apply_op(&mut work, op).map_err(|source| PatchError { index, source })?;
    }

    let mut counter: u64 = 0;
    ensure_element_ids_with(&mut work, &mut || {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_le_bytes());
        counter += 1;
        hex::encode(&hasher.finalize()[..4])
    });

    *doc = work;
    Ok(canonical)
}

/// The same pipeline against a clone, without touching the input document.
pub fn dry_run(doc: &WordDocument, ops: &[PatchOp]) -> Result<WordDocument, PatchError> {
    let mut work = doc.clone();
    apply_batch(&mut work, ops)?;
    Ok(work)
}

fn resolve_checked(doc: &WordDocument, raw: &str) -> Result<Resolution, SessionError> {
    let path = parse_path(raw)?;
    schema::validate(&path)?;
    resolve(doc, &path)
}

fn apply_op(doc: &mut WordDocument, op: &PatchOp) -> Result<(), SessionError> {
    match op {
        PatchOp::Add { path, value } => apply_add(doc, path, value),
        PatchOp::Replace { path, value } => apply_replace(doc, path, value),
        PatchOp::Remove { path } => {
            let resolution = resolve_checked(doc, path)?;
            let loc = expect_element(resolution, path, "remove")?;
            detach(doc, &loc).map(|_| ())
        }
        PatchOp::Move { from, path } => apply_move_copy(doc, from, path, true),
        PatchOp::Copy { from, path } => apply_move_copy(doc, from, path, false),
        PatchOp::ReplaceText {
            path,
            find,
            replace,
            max_count,
        } => apply_replace_text(doc, path, find, replace, *max_count),
        PatchOp::RemoveColumn { path, column } => apply_remove_column(doc, path, *column),
    }
}

fn expect_element(
    resolution: Resolution,
    path: &str,
    op: &str,
) -> Result<ElementLoc, SessionError> {
    match resolution {
        Resolution::Element(loc) => Ok(loc),
        Resolution::Many(_) => Err(SessionError::Schema(format!(
            "{op} cannot target a wildcard path {path:?}; wildcards are query-only"
        ))),
        _ => Err(SessionError::Schema(format!(
            "{op} requires a concrete element at {path:?}"
        ))),
    }
}

fn apply_add(doc: &mut WordDocument, path: &str, value: &PatchValue) -> Result<(), SessionError> {
    let resolution = resolve_checked(doc, path)?;
    let (parent, index) = match resolution {
        Resolution::Insertion { parent, index } => (parent, index),
        Resolution::Element(loc) => {
            let (parent, index) = loc.parent().ok_or_else(|| {
                SessionError::Internal("element address without a parent".into())
            })?;
            ensure_block_container(doc, &parent, path)?;
            (parent, index + 1)
        }
        _ => {
            return Err(SessionError::Schema(format!(
                "add requires an insertion point or an element at {path:?}"
            )))
        }
    };
    let blocks = materialize(value, doc)?;
    let target = container_blocks_mut(doc, &parent)?;
    let at = index.min(target.len());
    target.splice(at..at, blocks);
    Ok(())
}

fn ensure_block_container(
    doc: &WordDocument,
    parent: &ElementLoc,
    path: &str,
) -> Result<(), SessionError> {
    if parent.steps.is_empty() {
        return Ok(());
    }
    match node_at(doc, parent) {
        Some(NodeRef::Cell(_)) => Ok(()),
        _ => Err(SessionError::Schema(format!(
            "the parent of {path:?} does not accept block insertion"
        ))),
    }
}

fn apply_replace(
    doc: &mut WordDocument,
    path: &str,
    value: &serde_json::Value,
) -> Result<(), SessionError> {
    let resolution = resolve_checked(doc, path)?;
    match resolution {
        Resolution::StyleOf(loc) => {
            let patch: StylePatch = serde_json::from_value(value.clone()).map_err(|e| {
                SessionError::Schema(format!("invalid style value for {path:?}: {e}"))
            })?;
            apply_style(doc, &loc, &patch)
        }
        Resolution::Element(loc) => {
            let value: PatchValue = serde_json::from_value(value.clone()).map_err(|e| {
                SessionError::Schema(format!("invalid value for {path:?}: {e}"))
            })?;
            // Only block-level elements take freshly materialized subtrees.
            if !matches!(node_at(doc, &loc), Some(NodeRef::Block(_))) {
                return Err(SessionError::Schema(format!(
                    "replace at {path:?} targets an inline element; use /style or replace_text"
                )));
            }
            let (parent, index) = loc
                .parent()
                .ok_or_else(|| SessionError::Internal("element address without a parent".into()))?;
            let blocks = materialize(&value, doc)?;
            let target = container_blocks_mut(doc, &parent)?;
            target.splice(index..index + 1, blocks);
            Ok(())
        }
        Resolution::Many(_) => Err(SessionError::Schema(format!(
            "replace cannot target a wildcard path {path:?}; wildcards are query-only"
        ))),
        _ => Err(SessionError::Schema(format!(
            "replace requires an element or style facet at {path:?}"
        ))),
    }
}

fn apply_style(
    doc: &mut WordDocument,
    loc: &ElementLoc,
    patch: &StylePatch,
) -> Result<(), SessionError> {
    match node_at_mut(doc, loc) {
        Some(NodeMut::Block(BodyChild::Paragraph(p))) => {
            patch.apply_to_paragraph(p);
            Ok(())
        }
        Some(NodeMut::Block(BodyChild::Table(t))) => {
            for row in &mut t.rows {
                for cell in &mut row.cells {
                    for block in &mut cell.blocks {
                        if let BodyChild::Paragraph(p) = block {
                            patch.apply_to_paragraph(p);
                        }
                    }
                }
            }
            Ok(())
        }
        Some(NodeMut::Inline(Inline::Run(r))) => {
            patch.apply_to_run(&mut r.props);
            Ok(())
        }
        Some(NodeMut::Inline(Inline::Hyperlink(h))) => {
            for r in &mut h.runs {
                patch.apply_to_run(&mut r.props);
            }
            Ok(())
        }
        _ => Err(SessionError::Schema(
            "style values apply to paragraphs, tables, runs and hyperlinks".into(),
        )),
    }
}

fn apply_move_copy(
    doc: &mut WordDocument,
    from: &str,
    to: &str,
    is_move: bool,
) -> Result<(), SessionError> {
    let resolution = resolve_checked(doc, from)?;
    let from_loc = expect_element(resolution, from, if is_move { "move" } else { "copy" })?;
    let mut block = match node_at(doc, &from_loc) {
        Some(NodeRef::Block(b)) => b.clone(),
        Some(_) => {
            return Err(SessionError::Schema(format!(
                "move/copy applies to block-level elements, not {from:?}"
            )))
        }
        None => return Err(SessionError::resolve(from, "element vanished during apply")),
    };

    // Resolve the destination against the pre-detach tree, then shift its
    // address to account for the removal.
    let resolution = resolve_checked(doc, to)?;
    let (mut parent, mut index) = match resolution {
        Resolution::Insertion { parent, index } => (parent, index),
        Resolution::Element(loc) => {
            let (parent, index) = loc
                .parent()
                .ok_or_else(|| SessionError::Internal("element address without a parent".into()))?;
            ensure_block_container(doc, &parent, to)?;
            (parent, index + 1)
        }
        _ => {
            return Err(SessionError::Schema(format!(
                "move/copy destination {to:?} must be an insertion point or an element"
            )))
        }
    };

    if is_move {
        let (from_parent, from_index) = from_loc
            .parent()
            .ok_or_else(|| SessionError::Internal("element address without a parent".into()))?;
        detach(doc, &from_loc)?;
        adjust_after_detach(&mut parent, &from_parent, from_index, to)?;
        if parent == from_parent && index > from_index {
            index -= 1;
        }
    } else {
        // The copy gets fresh ids from the post-batch id pass.
        clear_block_ids(&mut block);
    }

    let target = container_blocks_mut(doc, &parent)?;
    let at = index.min(target.len());
    target.insert(at, block);
    Ok(())
}

/// After removing the element at `container[removed]`, shift any address
/// that passes through a later sibling; an address through the removed
/// element itself means the destination sat inside the moved subtree.
fn adjust_after_detach(
    loc: &mut ElementLoc,
    container: &ElementLoc,
    removed: usize,
    to: &str,
) -> Result<(), SessionError> {
    if loc.root != container.root {
        return Ok(());
    }
    let depth = container.steps.len();
    if loc.steps.len() > depth && loc.steps[..depth] == container.steps[..] {
        match loc.steps[depth].cmp(&removed) {
            std::cmp::Ordering::Greater => loc.steps[depth] -= 1,
            std::cmp::Ordering::Equal => {
                return Err(SessionError::Schema(format!(
                    "move destination {to:?} sits inside the moved element"
                )))
            }
            std::cmp::Ordering::Less => {}
        }
    }
    Ok(())
}

/// What `detach` pulled out of the tree.
#[allow(dead_code)]
enum Detached {
    Block(BodyChild),
    Inline(Inline),
    Row(docx_dom::TableRow),
    Cell(docx_dom::TableCell),
}

fn detach(doc: &mut WordDocument, loc: &ElementLoc) -> Result<Detached, SessionError> {
    let (parent, index) = loc
        .parent()
        .ok_or_else(|| SessionError::Internal("element address without a parent".into()))?;
    if parent.steps.is_empty() {
        let blocks = container_blocks_mut(doc, &parent)?;
        if index >= blocks.len() {
            return Err(SessionError::Internal("stale element address".into()));
        }
        return Ok(Detached::Block(blocks.remove(index)));
    }
    match node_at_mut(doc, &parent) {
        Some(NodeMut::Block(BodyChild::Table(t))) if index < t.rows.len() => {
            Ok(Detached::Row(t.rows.remove(index)))
        }
        Some(NodeMut::Block(BodyChild::Paragraph(p))) if index < p.children.len() => {
            Ok(Detached::Inline(p.children.remove(index)))
        }
        Some(NodeMut::Row(r)) if index < r.cells.len() => Ok(Detached::Cell(r.cells.remove(index))),
        Some(NodeMut::Cell(c)) if index < c.blocks.len() => {
            Ok(Detached::Block(c.blocks.remove(index)))
        }
        _ => Err(SessionError::Internal("stale element address".into())),
    }
}

fn clear_block_ids(block: &mut BodyChild) {
    match block {
        BodyChild::Paragraph(p) => {
            p.id = None;
            for inline in &mut p.children {
                match inline {
                    Inline::Run(r) => r.id = None,
                    Inline::Hyperlink(h) => {
                        h.id = None;
                        for r in &mut h.runs {
                            r.id = None;
                        }
                    }
                    Inline::Drawing(d) => d.id = None,
                    Inline::Bookmark(b) => b.id = None,
                }
            }
        }
        BodyChild::Table(t) => {
            t.id = None;
            for row in &mut t.rows {
                row.id = None;
                for cell in &mut row.cells {
                    cell.id = None;
                    for inner in &mut cell.blocks {
                        clear_block_ids(inner);
                    }
                }
            }
        }
        BodyChild::Section(s) => s.id = None,
    }
}

fn apply_replace_text(
    doc: &mut WordDocument,
    path: &str,
    find: &str,
    replace: &str,
    max_count: usize,
) -> Result<(), SessionError> {
    if find.is_empty() {
        return Err(SessionError::Schema(
            "replace_text requires a non-empty find string".into(),
        ));
    }
    if replace.is_empty() {
        return Err(SessionError::Schema(
            "replace_text replacement must be non-empty; use remove to delete content".into(),
        ));
    }

    let resolution = resolve_checked(doc, path)?;
    let mut remaining = max_count;
    match resolution {
        Resolution::Container(loc) => {
            let blocks = container_blocks_mut(doc, &loc)?;
            replace_in_blocks(blocks, find, replace, &mut remaining);
        }
        Resolution::Element(loc) => match node_at_mut(doc, &loc) {
            Some(NodeMut::Block(block)) => {
                replace_in_block(block, find, replace, &mut remaining);
            }
            Some(NodeMut::Inline(inline)) => {
                replace_in_inline(inline, find, replace, &mut remaining);
            }
            Some(NodeMut::Row(row)) => {
                for cell in &mut row.cells {
                    replace_in_blocks(&mut cell.blocks, find, replace, &mut remaining);
                }
            }
            Some(NodeMut::Cell(cell)) => {
                replace_in_blocks(&mut cell.blocks, find, replace, &mut remaining);
            }
            None => return Err(SessionError::resolve(path, "element vanished during apply")),
        },
        Resolution::Many(_) => {
            return Err(SessionError::Schema(format!(
                "replace_text cannot target a wildcard path {path:?}"
            )))
        }
        _ => {
            return Err(SessionError::Schema(format!(
                "replace_text requires an element or container at {path:?}"
            )))
        }
    }
    Ok(())
}

fn replace_in_blocks(blocks: &mut [BodyChild], find: &str, replace: &str, remaining: &mut usize) {
    for block in blocks {
        if *remaining == 0 {
            return;
        }
        replace_in_block(block, find, replace, remaining);
    }
}

fn replace_in_block(block: &mut BodyChild, find: &str, replace: &str, remaining: &mut usize) {
    match block {
        BodyChild::Paragraph(p) => {
            for inline in &mut p.children {
                if *remaining == 0 {
                    return;
                }
                replace_in_inline(inline, find, replace, remaining);
            }
        }
        BodyChild::Table(t) => {
            for row in &mut t.rows {
                for cell in &mut row.cells {
                    if *remaining == 0 {
                        return;
                    }
                    replace_in_blocks(&mut cell.blocks, find, replace, remaining);
                }
            }
        }
        BodyChild::Section(_) => {}
    }
}

fn replace_in_inline(inline: &mut Inline, find: &str, replace: &str, remaining: &mut usize) {
    match inline {
        Inline::Run(r) => replace_in_run(r, find, replace, remaining),
        Inline::Hyperlink(h) => {
            for r in &mut h.runs {
                if *remaining == 0 {
                    return;
                }
                replace_in_run(r, find, replace, remaining);
            }
        }
        Inline::Drawing(_) | Inline::Bookmark(_) => {}
    }
}

/// Replace within one run. The replacement stays inside the run, so the
/// surrounding formatting carries over to the replacement text.
fn replace_in_run(run: &mut Run, find: &str, replace: &str, remaining: &mut usize) {
    while *remaining > 0 {
        match run.text.find(find) {
            Some(at) => {
                run.text.replace_range(at..at + find.len(), replace);
                *remaining -= 1;
            }
            None => return,
        }
    }
}

fn apply_remove_column(
    doc: &mut WordDocument,
    path: &str,
    column: usize,
) -> Result<(), SessionError> {
    let resolution = resolve_checked(doc, path)?;
    let loc = expect_element(resolution, path, "remove_column")?;
    match node_at_mut(doc, &loc) {
        Some(NodeMut::Block(BodyChild::Table(table))) => {
            let width = table.column_count();
            if column >= width {
                return Err(SessionError::resolve(
                    path,
                    format!("column {column} out of range ({width} columns)"),
                ));
            }
            for row in &mut table.rows {
                if column < row.cells.len() {
                    row.cells.remove(column);
                }
            }
            Ok(())
        }
        _ => Err(SessionError::Schema(format!(
            "remove_column requires a table at {path:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Query support
// ---------------------------------------------------------------------------

/// Resolve a path for reading, without mutating anything.
pub fn query(doc: &WordDocument, raw: &str) -> Result<Resolution, SessionError> {
    let resolution = resolve_checked(doc, raw)?;
    Ok(resolution)
}

/// Text content at a path, for front-ends and tests.
pub fn query_text(doc: &WordDocument, raw: &str) -> Result<String, SessionError> {
    let resolution = resolve_checked(doc, raw)?;
    let loc = match resolution {
        Resolution::Element(loc) => loc,
        Resolution::Container(loc) => {
            let blocks = crate::resolve::container_blocks(doc, &loc)?;
            return Ok(blocks
                .iter()
                .filter_map(|b| match b {
                    BodyChild::Paragraph(p) => Some(p.text()),
                    BodyChild::Table(t) => Some(t.cell_text().join("\n")),
                    BodyChild::Section(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"));
        }
        _ => {
            return Err(SessionError::Schema(format!(
                "{raw:?} does not address readable text"
            )))
        }
    };
    match node_at(doc, &loc) {
        Some(NodeRef::Block(BodyChild::Paragraph(p))) => Ok(p.text()),
        Some(NodeRef::Block(BodyChild::Table(t))) => Ok(t.cell_text().join("\n")),
        Some(NodeRef::Block(BodyChild::Section(_))) => Ok(String::new()),
        Some(NodeRef::Inline(Inline::Run(r))) => Ok(r.text.clone()),
        Some(NodeRef::Inline(Inline::Hyperlink(h))) => {
            Ok(h.runs.iter().map(|r| r.text.as_str()).collect())
        }
        Some(NodeRef::Inline(_)) => Ok(String::new()),
        Some(NodeRef::Row(row)) => Ok(row
            .cells
            .iter()
            .map(docx_dom::TableCell::text)
            .collect::<Vec<_>>()
            .join("\n")),
        Some(NodeRef::Cell(cell)) => Ok(cell.text()),
        None => Err(SessionError::resolve(raw, "element vanished during query")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docx_dom::{ensure_element_ids, Paragraph as DomParagraph, Table, TableCell, TableRow};

    fn doc_with_table() -> WordDocument {
        let mut doc = WordDocument::new_empty();
        let rows = (0..3)
            .map(|r| TableRow {
                id: None,
                cells: (0..3)
                    .map(|c| TableCell {
                        id: None,
                        blocks: vec![BodyChild::Paragraph(DomParagraph::with_text(format!(
                            "r{r}c{c}"
                        )))],
                    })
                    .collect(),
            })
            .collect();
        doc.body.children.push(BodyChild::Table(Table {
            rows,
            ..Default::default()
        }));
        doc
    }

    fn ops(json: &str) -> Vec<PatchOp> {
        parse_batch(json).unwrap()
    }

    #[test]
    fn add_heading_and_paragraph() {
        let mut doc = WordDocument::new_empty();
        let batch = ops(
            r#"[{"op":"add","path":"/body/children/0","value":{"type":"heading","level":1,"text":"Hello"}},
                {"op":"add","path":"/body/children/1","value":{"type":"paragraph","text":"World"}}]"#,
        );
        apply_batch(&mut doc, &batch).unwrap();

        assert_eq!(query_text(&doc, "/body/heading[0]").unwrap(), "Hello");
        assert_eq!(query_text(&doc, "/body/paragraph[0]").unwrap(), "World");
        // The id pass ran.
        assert!(doc.body.children[0].element_id().is_some());
    }

    #[test]
    fn add_after_element() {
        let mut doc = WordDocument::new_empty();
        apply_batch(
            &mut doc,
            &ops(
                r#"[{"op":"add","path":"/body/children/0","value":{"type":"paragraph","text":"first"}},
                    {"op":"add","path":"/body/paragraph[0]","value":{"type":"paragraph","text":"second"}}]"#,
            ),
        )
        .unwrap();
        assert_eq!(query_text(&doc, "/body/paragraph[1]").unwrap(), "second");
    }

    #[test]
    fn batch_is_atomic_on_failure() {
        let mut doc = WordDocument::new_empty();
        apply_batch(
            &mut doc,
            &ops(r#"[{"op":"add","path":"/body/children/0","value":{"type":"paragraph","text":"keep"}}]"#),
        )
        .unwrap();
        let before = doc.to_bytes();

        let err = apply_batch(
            &mut doc,
            &ops(
                r#"[{"op":"add","path":"/body/children/1","value":{"type":"paragraph","text":"lost"}},
                    {"op":"remove","path":"/body/paragraph[9]"}]"#,
            ),
        )
        .unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(doc.to_bytes(), before);
    }

    #[test]
    fn replace_text_first_occurrence_only() {
        let mut doc = WordDocument::new_empty();
        doc.body
            .children
            .push(BodyChild::Paragraph(DomParagraph::with_text("foo bar foo")));

        apply_batch(
            &mut doc,
            &ops(
                r#"[{"op":"replace_text","path":"/body/paragraph[0]","find":"foo","replace":"baz","max_count":1}]"#,
            ),
        )
        .unwrap();
        assert_eq!(query_text(&doc, "/body/paragraph[0]").unwrap(), "baz bar foo");
    }

    #[test]
    fn replace_text_keeps_run_formatting() {
        let mut doc = WordDocument::new_empty();
        let mut p = DomParagraph::with_text("total: 10");
        if let Inline::Run(r) = &mut p.children[0] {
            r.props.bold = true;
        }
        doc.body.children.push(BodyChild::Paragraph(p));

        apply_batch(
            &mut doc,
            &ops(r#"[{"op":"replace_text","path":"/body/paragraph[0]","find":"10","replace":"12"}]"#),
        )
        .unwrap();

        let BodyChild::Paragraph(p) = &doc.body.children[0] else {
            panic!("expected paragraph");
        };
        let Inline::Run(r) = &p.children[0] else {
            panic!("expected run");
        };
        assert_eq!(r.text, "total: 12");
        assert!(r.props.bold);
    }

    #[test]
    fn replace_text_rejects_empty_replacement() {
        let mut doc = WordDocument::new_empty();
        doc.body
            .children
            .push(BodyChild::Paragraph(DomParagraph::with_text("x")));
        let err = apply_batch(
            &mut doc,
            &ops(r#"[{"op":"replace_text","path":"/body/paragraph[0]","find":"x","replace":""}]"#),
        )
        .unwrap_err();
        assert_eq!(err.source.kind(), "schema_error");
    }

    #[test]
    fn remove_column_from_every_row() {
        let mut doc = doc_with_table();
        apply_batch(
            &mut doc,
            &ops(r#"[{"op":"remove_column","path":"/body/table[0]","column":1}]"#),
        )
        .unwrap();

        let BodyChild::Table(t) = &doc.body.children[0] else {
            panic!("expected table");
        };
        for (r, row) in t.rows.iter().enumerate() {
            assert_eq!(row.cells.len(), 2);
            assert_eq!(row.cells[0].text(), format!("r{r}c0"));
            assert_eq!(row.cells[1].text(), format!("r{r}c2"));
        }
    }

    #[test]
    fn remove_column_out_of_range() {
        let mut doc = doc_with_table();
        let err = apply_batch(
            &mut doc,
            &ops(r#"[{"op":"remove_column","path":"/body/table[0]","column":5}]"#),
        )
        .unwrap_err();
        assert_eq!(err.source.kind(), "resolve_error");
    }

    #[test]
    fn move_shifts_indices_correctly() {
        let mut doc = WordDocument::new_empty();
        for text in ["a", "b", "c"] {
            doc.body
                .children
                .push(BodyChild::Paragraph(DomParagraph::with_text(text)));
        }
        apply_batch(
            &mut doc,
            &ops(r#"[{"op":"move","from":"/body/paragraph[0]","path":"/body/children/3"}]"#),
        )
        .unwrap();

        let texts: Vec<String> = (0..3)
            .map(|i| query_text(&doc, &format!("/body/paragraph[{i}]")).unwrap())
            .collect();
        assert_eq!(texts, vec!["b", "c", "a"]);
    }

    #[test]
    fn copy_gets_fresh_ids() {
        let mut doc = WordDocument::new_empty();
        doc.body
            .children
            .push(BodyChild::Paragraph(DomParagraph::with_text("original")));
        ensure_element_ids(&mut doc);
        let original_id = doc.body.children[0].element_id().unwrap().to_string();

        apply_batch(
            &mut doc,
            &ops(r#"[{"op":"copy","from":"/body/paragraph[0]","path":"/body/children/1"}]"#),
        )
        .unwrap();

        assert_eq!(doc.body.children.len(), 2);
        let copy_id = doc.body.children[1].element_id().unwrap();
        assert_ne!(copy_id, original_id);
        assert_eq!(query_text(&doc, "/body/paragraph[1]").unwrap(), "original");
    }

    #[test]
    fn replace_element_with_value() {
        let mut doc = WordDocument::new_empty();
        doc.body
            .children
            .push(BodyChild::Paragraph(DomParagraph::with_text("plain")));
        apply_batch(
            &mut doc,
            &ops(
                r#"[{"op":"replace","path":"/body/paragraph[0]","value":{"type":"heading","level":3,"text":"now a heading"}}]"#,
            ),
        )
        .unwrap();
        assert_eq!(query_text(&doc, "/body/heading[0]").unwrap(), "now a heading");
        assert!(query_text(&doc, "/body/paragraph[0]").is_err());
    }

    #[test]
    fn replace_style_facet() {
        let mut doc = WordDocument::new_empty();
        doc.body
            .children
            .push(BodyChild::Paragraph(DomParagraph::with_text("styled")));
        apply_batch(
            &mut doc,
            &ops(
                r#"[{"op":"replace","path":"/body/paragraph[0]/run[0]/style","value":{"bold":true,"color":"FF0000"}}]"#,
            ),
        )
        .unwrap();

        let BodyChild::Paragraph(p) = &doc.body.children[0] else {
            panic!("expected paragraph");
        };
        let Inline::Run(r) = &p.children[0] else {
            panic!("expected run");
        };
        assert!(r.props.bold);
        assert_eq!(r.props.color.as_deref(), Some("FF0000"));
    }

    #[test]
    fn unknown_op_is_a_parse_error() {
        let err = parse_batch(r#"[{"op":"merge","path":"/body"}]"#).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn missing_required_field_is_a_parse_error() {
        // add without value
        let err = parse_batch(r#"[{"op":"add","path":"/body/children/0"}]"#).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
        // move without from
        let err = parse_batch(r#"[{"op":"move","path":"/body/paragraph[0]"}]"#).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn dry_run_leaves_document_untouched() {
        let mut doc = WordDocument::new_empty();
        doc.body
            .children
            .push(BodyChild::Paragraph(DomParagraph::with_text("stable")));
        let before = doc.to_bytes();

        let preview = dry_run(
            &doc,
            &ops(r#"[{"op":"add","path":"/body/children/1","value":{"type":"paragraph","text":"preview"}}]"#),
        )
        .unwrap();

        assert_eq!(doc.to_bytes(), before);
        assert_eq!(preview.body.children.len(), 2);
    }

    #[test]
    fn apply_assigns_deterministic_ids() {
        let batch = ops(
            r#"[{"op":"add","path":"/body/children/0","value":{"type":"paragraph","text":"same"}}]"#,
        );
        let mut doc_a = WordDocument::new_empty();
        let mut doc_b = WordDocument::new_empty();
        apply_batch(&mut doc_a, &batch).unwrap();
        apply_batch(&mut doc_b, &batch).unwrap();
        assert_eq!(doc_a.to_bytes(), doc_b.to_bytes());
    }

    #[test]
    fn error_carries_patch_index() {
        let mut doc = WordDocument::new_empty();
        let err = apply_batch(
            &mut doc,
            &ops(r#"[{"op":"remove","path":"/body/paragraph[0]"}]"#),
        )
        .unwrap_err()
        .into_session_error();
        assert!(err.to_string().contains("patch 0"));
    }
}
