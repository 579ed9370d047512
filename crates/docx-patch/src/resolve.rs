//! Resolution of parsed paths to locations in the document tree.
//!
//! The tree is strictly owned, so resolution yields *addresses* (index
//! chains from a root container) rather than references. An address stays
//! meaningful for the duration of one patch operation only.

use docx_dom::{BodyChild, Inline, TableCell, TableRow, WordDocument};
use docx_session_core::SessionError;

use crate::path::{SegmentKind, Selector, TypedPath};

/// Root container an address is anchored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocRoot {
    Body,
    Header(usize),
    Footer(usize),
}

/// Address of a node: child indices walked from the root container.
///
/// Step meaning depends on the node passed through: block index in a
/// container, row index in a table, cell index in a row, inline index in a
/// paragraph, block index in a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementLoc {
    pub root: LocRoot,
    pub steps: Vec<usize>,
}

impl ElementLoc {
    pub fn container(root: LocRoot) -> Self {
        Self {
            root,
            steps: Vec::new(),
        }
    }

    pub fn child(&self, index: usize) -> Self {
        let mut steps = self.steps.clone();
        steps.push(index);
        Self {
            root: self.root.clone(),
            steps,
        }
    }

    /// Split into the enclosing address and the final index.
    pub fn parent(&self) -> Option<(ElementLoc, usize)> {
        let (&last, rest) = self.steps.split_last()?;
        Some((
            ElementLoc {
                root: self.root.clone(),
                steps: rest.to_vec(),
            },
            last,
        ))
    }
}

#[derive(Debug)]
pub enum NodeRef<'a> {
    Block(&'a BodyChild),
    Inline(&'a Inline),
    Row(&'a TableRow),
    Cell(&'a TableCell),
}

#[derive(Debug)]
pub enum NodeMut<'a> {
    Block(&'a mut BodyChild),
    Inline(&'a mut Inline),
    Row(&'a mut TableRow),
    Cell(&'a mut TableCell),
}

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A concrete element.
    Element(ElementLoc),
    /// A block container: the body, a header/footer, or a table cell.
    Container(ElementLoc),
    /// A parent + index pair from a `/children/N` segment.
    Insertion { parent: ElementLoc, index: usize },
    /// The style facet of an element, from a trailing `/style` segment.
    StyleOf(ElementLoc),
    /// All matches of a wildcard selector; query only.
    Many(Vec<ElementLoc>),
    /// `/metadata` or `/styles`.
    Virtual(SegmentKind),
}

/// Resolve a schema-valid path against a document.
pub fn resolve(doc: &WordDocument, path: &TypedPath) -> Result<Resolution, SessionError> {
    let first = &path.segments[0];
    let mut current = match first.kind {
        SegmentKind::Body => Resolution::Container(ElementLoc::container(LocRoot::Body)),
        SegmentKind::Metadata | SegmentKind::Styles => {
            return Ok(Resolution::Virtual(first.kind));
        }
        _ => {
            return Err(SessionError::Internal(format!(
                "schema admitted {:?} at path root",
                first.kind.as_str()
            )))
        }
    };

    for (i, segment) in path.segments.iter().enumerate().skip(1) {
        let is_last = i == path.segments.len() - 1;
        current = match segment.kind {
            SegmentKind::Children => {
                let parent = match current {
                    Resolution::Container(loc) => loc,
                    Resolution::Element(loc) => {
                        // Only cells are block containers among elements.
                        match node_at(doc, &loc) {
                            Some(NodeRef::Cell(_)) => loc,
                            _ => {
                                return Err(SessionError::Schema(format!(
                                    "in path {:?}: 'children' requires a block container",
                                    path.raw
                                )))
                            }
                        }
                    }
                    _ => {
                        return Err(SessionError::Schema(format!(
                            "in path {:?}: 'children' requires a block container",
                            path.raw
                        )))
                    }
                };
                let Some(Selector::Index(n)) = segment.selector else {
                    return Err(SessionError::Internal("children without index".into()));
                };
                let len = container_blocks(doc, &parent)?.len();
                let index = n as usize;
                if index > len {
                    return Err(SessionError::resolve(
                        &path.raw,
                        format!("insertion index {index} exceeds {len} children"),
                    ));
                }
                return Ok(Resolution::Insertion { parent, index });
            }
            SegmentKind::Style => {
                let Resolution::Element(loc) = current else {
                    return Err(SessionError::Schema(format!(
                        "in path {:?}: 'style' must follow a concrete element",
                        path.raw
                    )));
                };
                return Ok(Resolution::StyleOf(loc));
            }
            SegmentKind::Header | SegmentKind::Footer => {
                resolve_hdr_ftr(doc, segment.kind, &segment.selector, &path.raw)?
            }
            kind => {
                let container = resolution_as_context(doc, current, &path.raw)?;
                let candidates = collect_candidates(doc, &container, kind, &path.raw)?;
                select(candidates, &segment.selector, kind, &path.raw, is_last)?
            }
        };
    }

    Ok(current)
}

/// Where a mid-path resolution continues from.
enum Context {
    Container(ElementLoc),
    Element(ElementLoc),
}

fn resolution_as_context(
    doc: &WordDocument,
    current: Resolution,
    raw: &str,
) -> Result<Context, SessionError> {
    match current {
        Resolution::Container(loc) => Ok(Context::Container(loc)),
        Resolution::Element(loc) => {
            debug_assert!(node_at(doc, &loc).is_some());
            Ok(Context::Element(loc))
        }
        _ => Err(SessionError::Schema(format!(
            "in path {raw:?}: cannot descend further here"
        ))),
    }
}

fn resolve_hdr_ftr(
    doc: &WordDocument,
    kind: SegmentKind,
    selector: &Option<Selector>,
    raw: &str,
) -> Result<Resolution, SessionError> {
    let is_header = kind == SegmentKind::Header;
    let parts = if is_header { &doc.headers } else { &doc.footers };
    let noun = kind.as_str();

    let index = match selector {
        Some(Selector::HdrFtrType(t)) => parts
            .iter()
            .position(|p| p.kind.as_str() == t)
            .ok_or_else(|| {
                SessionError::resolve(raw, format!("document has no {noun} of type {t:?}"))
            })?,
        Some(Selector::Index(n)) => normalize_index(*n, parts.len()).ok_or_else(|| {
            SessionError::resolve(
                raw,
                format!("{noun} index {n} out of range ({} present)", parts.len()),
            )
        })?,
        None => match parts.len() {
            0 => {
                return Err(SessionError::resolve(
                    raw,
                    format!("document has no {noun} parts"),
                ))
            }
            1 => 0,
            n => {
                return Err(SessionError::ambiguous(
                    raw,
                    format!("{n} {noun} parts match; select one with type= or an index"),
                ))
            }
        },
        Some(other) => {
            return Err(SessionError::Schema(format!(
                "in path {raw:?}: selector {other:?} does not apply to {noun} parts"
            )))
        }
    };

    let root = if is_header {
        LocRoot::Header(index)
    } else {
        LocRoot::Footer(index)
    };
    Ok(Resolution::Container(ElementLoc::container(root)))
}

/// One matchable element under the current context.
struct Candidate {
    loc: ElementLoc,
    id: Option<String>,
    text: String,
    style: Option<String>,
    level: Option<u8>,
}

fn collect_candidates(
    doc: &WordDocument,
    context: &Context,
    kind: SegmentKind,
    raw: &str,
) -> Result<Vec<Candidate>, SessionError> {
    match context {
        Context::Container(loc) => {
            let blocks = container_blocks(doc, loc)?;
            Ok(block_candidates(blocks, loc, kind))
        }
        Context::Element(loc) => match node_at(doc, loc) {
            Some(NodeRef::Block(BodyChild::Table(table))) => match kind {
                SegmentKind::Row => Ok(table
                    .rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| Candidate {
                        loc: loc.child(i),
                        id: row.id.clone(),
                        text: row
                            .cells
                            .iter()
                            .map(TableCell::text)
                            .collect::<Vec<_>>()
                            .join("\n"),
                        style: None,
                        level: None,
                    })
                    .collect()),
                _ => Ok(Vec::new()),
            },
            Some(NodeRef::Row(row)) => match kind {
                SegmentKind::Cell => Ok(row
                    .cells
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| Candidate {
                        loc: loc.child(i),
                        id: cell.id.clone(),
                        text: cell.text(),
                        style: None,
                        level: None,
                    })
                    .collect()),
                _ => Ok(Vec::new()),
            },
            Some(NodeRef::Cell(cell)) => Ok(block_candidates(&cell.blocks, loc, kind)),
            Some(NodeRef::Block(BodyChild::Paragraph(p))) => {
                Ok(inline_candidates(&p.children, loc, kind))
            }
            _ => Err(SessionError::resolve(
                raw,
                format!("{:?} has no {} children", loc, kind.as_str()),
            )),
        },
    }
}

fn block_candidates(blocks: &[BodyChild], base: &ElementLoc, kind: SegmentKind) -> Vec<Candidate> {
    blocks
        .iter()
        .enumerate()
        .filter_map(|(i, child)| {
            let matches = match (kind, child) {
                (SegmentKind::Paragraph, BodyChild::Paragraph(p)) => p.heading_level().is_none(),
                (SegmentKind::Heading, BodyChild::Paragraph(p)) => p.heading_level().is_some(),
                (SegmentKind::Table, BodyChild::Table(_)) => true,
                (SegmentKind::Section, BodyChild::Section(_)) => true,
                _ => false,
            };
            if !matches {
                return None;
            }
            Some(match child {
                BodyChild::Paragraph(p) => Candidate {
                    loc: base.child(i),
                    id: p.id.clone(),
                    text: p.text(),
                    style: p.style.clone(),
                    level: p.heading_level(),
                },
                BodyChild::Table(t) => Candidate {
                    loc: base.child(i),
                    id: t.id.clone(),
                    text: t.cell_text().join("\n"),
                    style: t.style.clone(),
                    level: None,
                },
                BodyChild::Section(s) => Candidate {
                    loc: base.child(i),
                    id: s.id.clone(),
                    text: String::new(),
                    style: None,
                    level: None,
                },
            })
        })
        .collect()
}

fn inline_candidates(inlines: &[Inline], base: &ElementLoc, kind: SegmentKind) -> Vec<Candidate> {
    inlines
        .iter()
        .enumerate()
        .filter_map(|(i, inline)| {
            let candidate = match (kind, inline) {
                (SegmentKind::Run, Inline::Run(r)) => Candidate {
                    loc: base.child(i),
                    id: r.id.clone(),
                    text: r.text.clone(),
                    style: None,
                    level: None,
                },
                (SegmentKind::Hyperlink, Inline::Hyperlink(h)) => Candidate {
                    loc: base.child(i),
                    id: h.id.clone(),
                    text: h.runs.iter().map(|r| r.text.as_str()).collect(),
                    style: None,
                    level: None,
                },
                (SegmentKind::Drawing, Inline::Drawing(d)) => Candidate {
                    loc: base.child(i),
                    id: d.id.clone(),
                    text: String::new(),
                    style: None,
                    level: None,
                },
                (SegmentKind::Bookmark, Inline::Bookmark(b)) => Candidate {
                    loc: base.child(i),
                    id: b.id.clone(),
                    text: b.name.clone(),
                    style: None,
                    level: None,
                },
                _ => return None,
            };
            Some(candidate)
        })
        .collect()
}

fn select(
    candidates: Vec<Candidate>,
    selector: &Option<Selector>,
    kind: SegmentKind,
    raw: &str,
    is_last: bool,
) -> Result<Resolution, SessionError> {
    let noun = kind.as_str();
    match selector {
        None => match candidates.as_slice() {
            [] => Err(SessionError::resolve(raw, format!("no {noun} found"))),
            [only] => Ok(Resolution::Element(only.loc.clone())),
            many => Err(SessionError::ambiguous(
                raw,
                format!("{} {noun} elements match; add a selector", many.len()),
            )),
        },
        Some(Selector::Wildcard) => {
            if !is_last {
                return Err(SessionError::Schema(format!(
                    "in path {raw:?}: wildcard selectors are query-only and must be final"
                )));
            }
            Ok(Resolution::Many(
                candidates.into_iter().map(|c| c.loc).collect(),
            ))
        }
        Some(Selector::Index(n)) => {
            let len = candidates.len();
            let index = normalize_index(*n, len).ok_or_else(|| {
                SessionError::resolve(raw, format!("{noun} index {n} out of range ({len} present)"))
            })?;
            Ok(Resolution::Element(candidates[index].loc.clone()))
        }
        Some(selector) => {
            let matched: Vec<&Candidate> = candidates
                .iter()
                .filter(|c| matches_selector(c, selector))
                .collect();
            match matched.len() {
                0 => Err(SessionError::resolve(
                    raw,
                    format!("no {noun} matches {}", describe_selector(selector)),
                )),
                1 => Ok(Resolution::Element(matched[0].loc.clone())),
                n => Err(SessionError::ambiguous(
                    raw,
                    format!(
                        "{n} {noun} elements match {}; a singular reference is required",
                        describe_selector(selector)
                    ),
                )),
            }
        }
    }
}

fn matches_selector(c: &Candidate, selector: &Selector) -> bool {
    match selector {
        Selector::Id(id) => c.id.as_deref() == Some(id.as_str()),
        Selector::TextExact(t) => c.text == *t,
        Selector::TextContains(t) => c.text.contains(t.as_str()),
        Selector::Style(s) => c.style.as_deref() == Some(s.as_str()),
        Selector::Level(l) => c.level == Some(*l as u8),
        Selector::Index(_) | Selector::Wildcard | Selector::HdrFtrType(_) => false,
    }
}

fn describe_selector(selector: &Selector) -> String {
    match selector {
        Selector::Id(v) => format!("id='{v}'"),
        Selector::TextExact(v) => format!("text='{v}'"),
        Selector::TextContains(v) => format!("text~='{v}'"),
        Selector::Style(v) => format!("style='{v}'"),
        Selector::Level(v) => format!("level={v}"),
        Selector::Index(v) => format!("index {v}"),
        Selector::HdrFtrType(v) => format!("type={v}"),
        Selector::Wildcard => "*".to_string(),
    }
}

fn normalize_index(n: i64, len: usize) -> Option<usize> {
    let index = if n < 0 { n + len as i64 } else { n };
    (index >= 0 && (index as usize) < len).then_some(index as usize)
}

// ---------------------------------------------------------------------------
// Address navigation
// ---------------------------------------------------------------------------

/// Blocks of a container address: the root container itself, or a cell.
pub fn container_blocks<'a>(
    doc: &'a WordDocument,
    loc: &ElementLoc,
) -> Result<&'a [BodyChild], SessionError> {
    if loc.steps.is_empty() {
        return Ok(root_blocks(doc, &loc.root));
    }
    match node_at(doc, loc) {
        Some(NodeRef::Cell(cell)) => Ok(&cell.blocks),
        _ => Err(SessionError::Internal(format!(
            "address {loc:?} is not a block container"
        ))),
    }
}

pub fn container_blocks_mut<'a>(
    doc: &'a mut WordDocument,
    loc: &ElementLoc,
) -> Result<&'a mut Vec<BodyChild>, SessionError> {
    if loc.steps.is_empty() {
        return Ok(root_blocks_mut(doc, &loc.root));
    }
    match node_at_mut(doc, loc) {
        Some(NodeMut::Cell(cell)) => Ok(&mut cell.blocks),
        _ => Err(SessionError::Internal(format!(
            "address {loc:?} is not a block container"
        ))),
    }
}

fn root_blocks<'a>(doc: &'a WordDocument, root: &LocRoot) -> &'a [BodyChild] {
    match root {
        LocRoot::Body => &doc.body.children,
        LocRoot::Header(i) => &doc.headers[*i].blocks,
        LocRoot::Footer(i) => &doc.footers[*i].blocks,
    }
}

fn root_blocks_mut<'a>(doc: &'a mut WordDocument, root: &LocRoot) -> &'a mut Vec<BodyChild> {
    match root {
        LocRoot::Body => &mut doc.body.children,
        LocRoot::Header(i) => &mut doc.headers[*i].blocks,
        LocRoot::Footer(i) => &mut doc.footers[*i].blocks,
    }
}

pub fn node_at<'a>(doc: &'a WordDocument, loc: &ElementLoc) -> Option<NodeRef<'a>> {
    let blocks = root_blocks(doc, &loc.root);
    let (&first, rest) = loc.steps.split_first()?;
    let mut current = NodeRef::Block(blocks.get(first)?);
    for &step in rest {
        current = match current {
            NodeRef::Block(BodyChild::Table(t)) => NodeRef::Row(t.rows.get(step)?),
            NodeRef::Block(BodyChild::Paragraph(p)) => NodeRef::Inline(p.children.get(step)?),
            NodeRef::Row(r) => NodeRef::Cell(r.cells.get(step)?),
            NodeRef::Cell(c) => NodeRef::Block(c.blocks.get(step)?),
            _ => return None,
        };
    }
    Some(current)
}

pub fn node_at_mut<'a>(doc: &'a mut WordDocument, loc: &ElementLoc) -> Option<NodeMut<'a>> {
    let blocks = root_blocks_mut(doc, &loc.root);
    let (&first, rest) = loc.steps.split_first()?;
    let mut current = NodeMut::Block(blocks.get_mut(first)?);
    for &step in rest {
        current = match current {
            NodeMut::Block(BodyChild::Table(t)) => NodeMut::Row(t.rows.get_mut(step)?),
            NodeMut::Block(BodyChild::Paragraph(p)) => NodeMut::Inline(p.children.get_mut(step)?),
            NodeMut::Row(r) => NodeMut::Cell(r.cells.get_mut(step)?),
            NodeMut::Cell(c) => NodeMut::Block(c.blocks.get_mut(step)?),
            _ => return None,
        };
    }
    Some(current)
}
