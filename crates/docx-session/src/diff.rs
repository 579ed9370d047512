//! Body diff: content-addressed matching between two documents.
//!
//! Elements pair up by exact fingerprint first, then by greedy fuzzy
//! similarity; exact pairs that fall outside the longest order-preserving
//! chain are moves, fuzzy pairs are modifications, and the leftovers are
//! removals and additions.

use serde::{Deserialize, Serialize};

use docx_dom::{BodyChild, WordDocument};
use docx_patch::{PatchOp, PatchValue};
use docx_session_core::ChangeSummary;

use crate::fingerprint::fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Paragraph,
    Heading,
    Table,
}

impl ElementKind {
    fn segment(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::Table => "table",
        }
    }
}

/// One detected change, carried in pending-change records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ElementChange {
    Added {
        new_index: usize,
        kind: ElementKind,
        text: String,
    },
    Removed {
        old_index: usize,
        kind: ElementKind,
        text: String,
    },
    Modified {
        old_index: usize,
        new_index: usize,
        kind: ElementKind,
        similarity: f64,
    },
    Moved {
        old_index: usize,
        new_index: usize,
        kind: ElementKind,
    },
}

/// Result of diffing two bodies.
#[derive(Debug, Clone)]
pub struct BodyDiff {
    pub changes: Vec<ElementChange>,
    pub summary: ChangeSummary,
    /// Logical patches expressing the diff against the original body.
    /// Advisory: the sync snapshot is authoritative.
    pub patches: Vec<PatchOp>,
}

impl BodyDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A matchable body element, flattened for the matcher.
struct Item {
    /// Index in the body child list.
    body_index: usize,
    /// Index among elements of the same kind, for path addressing.
    kind_index: usize,
    kind: ElementKind,
    level: Option<u8>,
    fingerprint: String,
    text: String,
    normalized: String,
    rows: usize,
    cols: usize,
    cells: Vec<Vec<String>>,
}

fn collect(doc: &WordDocument) -> Vec<Item> {
    let mut items = Vec::new();
    let mut kind_counts = [0usize; 3];
    for (body_index, child) in doc.body.children.iter().enumerate() {
        let Some(fp) = fingerprint(child) else {
            continue;
        };
        let item = match child {
            BodyChild::Paragraph(p) => {
                let kind = if p.heading_level().is_some() {
                    ElementKind::Heading
                } else {
                    ElementKind::Paragraph
                };
                let text = p.text();
                Item {
                    body_index,
                    kind_index: 0,
                    kind,
                    level: p.heading_level(),
                    fingerprint: fp,
                    normalized: normalize(&text),
                    text,
                    rows: 0,
                    cols: 0,
                    cells: Vec::new(),
                }
            }
            BodyChild::Table(t) => {
                let cells: Vec<Vec<String>> = t
                    .rows
                    .iter()
                    .map(|r| r.cells.iter().map(|c| c.text()).collect())
                    .collect();
                let text = t.cell_text().join("\n");
                Item {
                    body_index,
                    kind_index: 0,
                    kind: ElementKind::Table,
                    level: None,
                    fingerprint: fp,
                    normalized: normalize(&text),
                    text,
                    rows: t.rows.len(),
                    cols: t.column_count(),
                    cells,
                }
            }
            BodyChild::Section(_) => continue,
        };
        let slot = match item.kind {
            ElementKind::Paragraph => 0,
            ElementKind::Heading => 1,
            ElementKind::Table => 2,
        };
        let mut item = item;
        item.kind_index = kind_counts[slot];
        kind_counts[slot] += 1;
        items.push(item);
    }
    items
}

/// Diff the bodies of `original` and `modified` with the given fuzzy
/// similarity threshold.
pub fn diff_bodies(original: &WordDocument, modified: &WordDocument, threshold: f64) -> BodyDiff {
    let o = collect(original);
    let m = collect(modified);

    // Step 1: exact fingerprint pairs, greedily in order.
    let mut o_match: Vec<Option<usize>> = vec![None; o.len()];
    let mut m_taken = vec![false; m.len()];
    let mut exact_pairs: Vec<(usize, usize)> = Vec::new();
    for (i, oi) in o.iter().enumerate() {
        if let Some(j) = m
            .iter()
            .enumerate()
            .position(|(j, mj)| !m_taken[j] && mj.fingerprint == oi.fingerprint)
        {
            o_match[i] = Some(j);
            m_taken[j] = true;
            exact_pairs.push((i, j));
        }
    }

    // Step 2: similarity matrix over the leftovers.
    let mut scored: Vec<(f64, usize, usize)> = Vec::new();
    for (i, oi) in o.iter().enumerate() {
        if o_match[i].is_some() {
            continue;
        }
        for (j, mj) in m.iter().enumerate() {
            if m_taken[j] {
                continue;
            }
            let sim = similarity(oi, mj);
            if sim >= threshold {
                scored.push((sim, i, j));
            }
        }
    }
    // Highest similarity first; index order breaks ties deterministically.
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.1, a.2).cmp(&(b.1, b.2)))
    });

    // Step 3: greedy similar pairs.
    let mut similar_pairs: Vec<(usize, usize, f64)> = Vec::new();
    for (sim, i, j) in scored {
        if o_match[i].is_some() || m_taken[j] {
            continue;
        }
        o_match[i] = Some(j);
        m_taken[j] = true;
        similar_pairs.push((i, j, sim));
    }

    // An in-place rewrite can fall under the threshold entirely; a leftover
    // pair of the same kind at the same body position is still a
    // modification, not a remove + add.
    for (i, oi) in o.iter().enumerate() {
        if o_match[i].is_some() {
            continue;
        }
        let positional = m.iter().enumerate().position(|(j, mj)| {
            !m_taken[j] && mj.kind == oi.kind && mj.body_index == oi.body_index
        });
        if let Some(j) = positional {
            o_match[i] = Some(j);
            m_taken[j] = true;
            similar_pairs.push((i, j, similarity(oi, &m[j])));
        }
    }

    // Step 5: exact pairs that break the longest order-preserving chain are
    // moves.
    let stable = longest_increasing(&exact_pairs);
    let mut changes = Vec::new();
    let mut summary = ChangeSummary::default();

    for (idx, &(i, j)) in exact_pairs.iter().enumerate() {
        if !stable.contains(&idx) {
            changes.push(ElementChange::Moved {
                old_index: o[i].body_index,
                new_index: m[j].body_index,
                kind: o[i].kind,
            });
            summary.moved += 1;
        }
    }
    for &(i, j, sim) in &similar_pairs {
        changes.push(ElementChange::Modified {
            old_index: o[i].body_index,
            new_index: m[j].body_index,
            kind: o[i].kind,
            similarity: sim,
        });
        summary.modified += 1;
    }
    // Step 4: leftovers.
    for (i, oi) in o.iter().enumerate() {
        if o_match[i].is_none() {
            changes.push(ElementChange::Removed {
                old_index: oi.body_index,
                kind: oi.kind,
                text: oi.text.clone(),
            });
            summary.removed += 1;
        }
    }
    for (j, mj) in m.iter().enumerate() {
        if !m_taken[j] {
            changes.push(ElementChange::Added {
                new_index: mj.body_index,
                kind: mj.kind,
                text: mj.text.clone(),
            });
            summary.added += 1;
        }
    }
    summary.total_changes = summary.added + summary.removed + summary.modified + summary.moved;

    let patches = emit_patches(&o, &m, &o_match, &m_taken, &changes);
    BodyDiff {
        changes,
        summary,
        patches,
    }
}

/// Similarity in [0, 1]; zero across kinds.
fn similarity(a: &Item, b: &Item) -> f64 {
    if a.kind != b.kind {
        return 0.0;
    }
    let text_sim = levenshtein_ratio(&a.normalized, &b.normalized);
    if a.kind == ElementKind::Table {
        let row_sim = dimension_similarity(a.rows, b.rows);
        let col_sim = dimension_similarity(a.cols, b.cols);
        (text_sim + (row_sim + col_sim) / 2.0) / 2.0
    } else {
        text_sim
    }
}

fn dimension_similarity(a: usize, b: usize) -> f64 {
    let max = a.max(b);
    if max == 0 {
        return 1.0;
    }
    1.0 - (a.abs_diff(b) as f64) / (max as f64)
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein ratio over chars: `1 - distance / max_len`.
fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max = a.len().max(b.len());
    if max == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(&a, &b) as f64) / (max as f64)
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Indices (into `pairs`) of the longest subsequence whose second components
/// increase; `pairs` is already sorted by the first component.
fn longest_increasing(pairs: &[(usize, usize)]) -> std::collections::HashSet<usize> {
    let n = pairs.len();
    let mut best_len = vec![1usize; n];
    let mut prev = vec![usize::MAX; n];
    let mut best_end = 0usize;
    for i in 0..n {
        for k in 0..i {
            if pairs[k].1 < pairs[i].1 && best_len[k] + 1 > best_len[i] {
                best_len[i] = best_len[k] + 1;
                prev[i] = k;
            }
        }
        if best_len[i] > best_len[best_end] {
            best_end = i;
        }
    }
    let mut keep = std::collections::HashSet::new();
    if n == 0 {
        return keep;
    }
    let mut cursor = best_end;
    loop {
        keep.insert(cursor);
        if prev[cursor] == usize::MAX {
            break;
        }
        cursor = prev[cursor];
    }
    keep
}

/// Emit logical patches: removes in reverse index order, then replaces, then
/// moves, then adds in ascending target index.
fn emit_patches(
    o: &[Item],
    m: &[Item],
    o_match: &[Option<usize>],
    m_taken: &[bool],
    changes: &[ElementChange],
) -> Vec<PatchOp> {
    let mut patches = Vec::new();

    let mut removed: Vec<&Item> = o
        .iter()
        .enumerate()
        .filter(|(i, _)| o_match[*i].is_none())
        .map(|(_, item)| item)
        .collect();
    removed.sort_by(|a, b| b.body_index.cmp(&a.body_index));
    for item in removed {
        patches.push(PatchOp::Remove {
            path: item_path(item),
        });
    }

    for change in changes {
        if let ElementChange::Modified {
            old_index,
            new_index,
            ..
        } = change
        {
            let (Some(old_item), Some(new_item)) = (
                o.iter().find(|it| it.body_index == *old_index),
                m.iter().find(|it| it.body_index == *new_index),
            ) else {
                continue;
            };
            patches.push(PatchOp::Replace {
                path: item_path(old_item),
                value: serde_json::to_value(item_value(new_item)).unwrap_or_default(),
            });
        }
    }

    for change in changes {
        if let ElementChange::Moved {
            old_index,
            new_index,
            ..
        } = change
        {
            if let Some(old_item) = o.iter().find(|it| it.body_index == *old_index) {
                patches.push(PatchOp::Move {
                    from: item_path(old_item),
                    path: format!("/body/children/{new_index}"),
                });
            }
        }
    }

    let mut added: Vec<&Item> = m
        .iter()
        .enumerate()
        .filter(|(j, _)| !m_taken[*j])
        .map(|(_, item)| item)
        .collect();
    added.sort_by_key(|item| item.body_index);
    for item in added {
        patches.push(PatchOp::Add {
            path: format!("/body/children/{}", item.body_index),
            value: item_value(item),
        });
    }

    patches
}

/// Content-based locator against the original body: exact text when the
/// element carries any, kind-scoped index otherwise.
fn item_path(item: &Item) -> String {
    if !item.text.is_empty() && item.kind != ElementKind::Table && !item.text.contains('\'') {
        format!("/body/{}[text='{}']", item.kind.segment(), item.text)
    } else {
        format!("/body/{}[{}]", item.kind.segment(), item.kind_index)
    }
}

fn item_value(item: &Item) -> PatchValue {
    match item.kind {
        ElementKind::Paragraph => PatchValue::Paragraph {
            text: item.text.clone(),
            style: None,
        },
        ElementKind::Heading => PatchValue::Heading {
            level: item.level.unwrap_or(1),
            text: item.text.clone(),
        },
        ElementKind::Table => PatchValue::Table {
            rows: item.cells.clone(),
            headers: None,
            border_style: None,
        },
    }
}
