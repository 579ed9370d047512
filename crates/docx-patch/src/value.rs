//! The recognized shapes of a patch `value` and their materialization into
//! DOM subtrees.

use serde::{Deserialize, Serialize};

use docx_dom::{
    BodyChild, Drawing, Hyperlink, Inline, Paragraph, Run, RunProps, Table, TableCell, TableRow,
    WordDocument,
};
use docx_session_core::SessionError;

/// Tagged value accepted by `add` and element-target `replace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchValue {
    Paragraph {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<StylePatch>,
    },
    Heading {
        level: u8,
        text: String,
    },
    Table {
        rows: Vec<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        border_style: Option<String>,
    },
    Image {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
    Hyperlink {
        text: String,
        url: String,
    },
    List {
        items: Vec<String>,
        #[serde(default)]
        ordered: bool,
    },
    PageBreak,
}

/// Formatting facet accepted by `replace` onto a `/style` segment, and as the
/// optional `style` of a paragraph value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StylePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<String>,
}

impl StylePatch {
    pub fn apply_to_run(&self, props: &mut RunProps) {
        if let Some(v) = self.bold {
            props.bold = v;
        }
        if let Some(v) = self.italic {
            props.italic = v;
        }
        if let Some(v) = self.underline {
            props.underline = v;
        }
        if let Some(v) = self.strike {
            props.strike = v;
        }
        if let Some(v) = self.font_size {
            props.font_size = Some(v);
        }
        if let Some(v) = &self.font_name {
            props.font_name = Some(v.clone());
        }
        if let Some(v) = &self.color {
            props.color = Some(v.clone());
        }
    }

    pub fn apply_to_paragraph(&self, paragraph: &mut Paragraph) {
        if let Some(v) = &self.alignment {
            paragraph.alignment = Some(v.clone());
        }
        for inline in &mut paragraph.children {
            match inline {
                Inline::Run(r) => self.apply_to_run(&mut r.props),
                Inline::Hyperlink(h) => {
                    for r in &mut h.runs {
                        self.apply_to_run(&mut r.props);
                    }
                }
                Inline::Drawing(_) | Inline::Bookmark(_) => {}
            }
        }
    }
}

/// Build the block subtrees a value stands for. A `list` yields one
/// paragraph per item; everything else yields exactly one block.
///
/// `image` reads the file at `path` and registers it as a media part, which
/// is why this takes the document mutably.
pub fn materialize(
    value: &PatchValue,
    doc: &mut WordDocument,
) -> Result<Vec<BodyChild>, SessionError> {
    match value {
        PatchValue::Paragraph { text, style } => {
            let mut paragraph = Paragraph::with_text(text.clone());
            if let Some(style) = style {
                style.apply_to_paragraph(&mut paragraph);
            }
            Ok(vec![BodyChild::Paragraph(paragraph)])
        }
        PatchValue::Heading { level, text } => {
            if !(1..=9).contains(level) {
                return Err(SessionError::Schema(format!(
                    "heading level must be 1..=9, got {level}"
                )));
            }
            let mut paragraph = Paragraph::with_text(text.clone());
            paragraph.style = Some(format!("Heading{level}"));
            Ok(vec![BodyChild::Paragraph(paragraph)])
        }
        PatchValue::Table {
            rows,
            headers,
            border_style,
        } => {
            let mut table = Table {
                style: Some("TableGrid".to_string()),
                border_style: border_style.clone(),
                ..Default::default()
            };
            if let Some(headers) = headers {
                let cells = headers
                    .iter()
                    .map(|text| {
                        let mut paragraph = Paragraph::with_text(text.clone());
                        if let Inline::Run(run) = &mut paragraph.children[0] {
                            run.props.bold = true;
                        }
                        TableCell {
                            id: None,
                            blocks: vec![BodyChild::Paragraph(paragraph)],
                        }
                    })
                    .collect();
                table.rows.push(TableRow { id: None, cells });
            }
            for row in rows {
                let cells = row
                    .iter()
                    .map(|text| TableCell {
                        id: None,
                        blocks: vec![BodyChild::Paragraph(Paragraph::with_text(text.clone()))],
                    })
                    .collect();
                table.rows.push(TableRow { id: None, cells });
            }
            Ok(vec![BodyChild::Table(table)])
        }
        PatchValue::Image {
            path,
            width,
            height,
            alt,
        } => {
            let data = std::fs::read(path)
                .map_err(|e| SessionError::io(format!("failed to read image {path}"), e))?;
            let extension = std::path::Path::new(path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("png");
            let media = doc.add_media(extension, data);
            let paragraph = Paragraph {
                children: vec![Inline::Drawing(Drawing {
                    id: None,
                    media,
                    width: *width,
                    height: *height,
                    alt: alt.clone(),
                })],
                ..Default::default()
            };
            Ok(vec![BodyChild::Paragraph(paragraph)])
        }
        PatchValue::Hyperlink { text, url } => {
            let paragraph = Paragraph {
                children: vec![Inline::Hyperlink(Hyperlink {
                    id: None,
                    url: url.clone(),
                    runs: vec![Run::new(text.clone())],
                })],
                ..Default::default()
            };
            Ok(vec![BodyChild::Paragraph(paragraph)])
        }
        PatchValue::List { items, ordered } => {
            let style = if *ordered { "ListNumber" } else { "ListBullet" };
            Ok(items
                .iter()
                .map(|item| {
                    let mut paragraph = Paragraph::with_text(item.clone());
                    paragraph.style = Some(style.to_string());
                    BodyChild::Paragraph(paragraph)
                })
                .collect())
        }
        PatchValue::PageBreak => {
            let paragraph = Paragraph {
                children: vec![Inline::Run(Run {
                    page_break: true,
                    ..Default::default()
                })],
                ..Default::default()
            };
            Ok(vec![BodyChild::Paragraph(paragraph)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_materializes_with_style() {
        let mut doc = WordDocument::new_empty();
        let blocks = materialize(
            &PatchValue::Heading {
                level: 2,
                text: "Results".into(),
            },
            &mut doc,
        )
        .unwrap();
        let [BodyChild::Paragraph(p)] = blocks.as_slice() else {
            panic!("expected one paragraph");
        };
        assert_eq!(p.style.as_deref(), Some("Heading2"));
        assert_eq!(p.heading_level(), Some(2));
    }

    #[test]
    fn heading_level_is_validated() {
        let mut doc = WordDocument::new_empty();
        let err = materialize(
            &PatchValue::Heading {
                level: 12,
                text: "too deep".into(),
            },
            &mut doc,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "schema_error");
    }

    #[test]
    fn table_gets_bold_header_row() {
        let mut doc = WordDocument::new_empty();
        let blocks = materialize(
            &PatchValue::Table {
                rows: vec![vec!["1".into(), "2".into()]],
                headers: Some(vec!["a".into(), "b".into()]),
                border_style: Some("single".into()),
            },
            &mut doc,
        )
        .unwrap();
        let [BodyChild::Table(t)] = blocks.as_slice() else {
            panic!("expected one table");
        };
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.border_style.as_deref(), Some("single"));
        let BodyChild::Paragraph(header_cell) = &t.rows[0].cells[0].blocks[0] else {
            panic!("expected paragraph");
        };
        let Inline::Run(r) = &header_cell.children[0] else {
            panic!("expected run");
        };
        assert!(r.props.bold);
    }

    #[test]
    fn list_yields_one_paragraph_per_item() {
        let mut doc = WordDocument::new_empty();
        let blocks = materialize(
            &PatchValue::List {
                items: vec!["x".into(), "y".into(), "z".into()],
                ordered: true,
            },
            &mut doc,
        )
        .unwrap();
        assert_eq!(blocks.len(), 3);
        let BodyChild::Paragraph(p) = &blocks[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(p.style.as_deref(), Some("ListNumber"));
    }

    #[test]
    fn page_break_paragraph() {
        let mut doc = WordDocument::new_empty();
        let blocks = materialize(&PatchValue::PageBreak, &mut doc).unwrap();
        let [BodyChild::Paragraph(p)] = blocks.as_slice() else {
            panic!("expected one paragraph");
        };
        let Inline::Run(r) = &p.children[0] else {
            panic!("expected run");
        };
        assert!(r.page_break);
    }

    #[test]
    fn value_json_shape() {
        let value: PatchValue =
            serde_json::from_str(r#"{"type":"heading","level":1,"text":"Hello"}"#).unwrap();
        assert_eq!(
            value,
            PatchValue::Heading {
                level: 1,
                text: "Hello".into()
            }
        );

        // Unknown discriminators are rejected.
        assert!(serde_json::from_str::<PatchValue>(r#"{"type":"chart","data":[]}"#).is_err());
    }

    #[test]
    fn style_patch_merges_onto_existing_props() {
        let mut props = RunProps {
            italic: true,
            ..Default::default()
        };
        let patch = StylePatch {
            bold: Some(true),
            font_size: Some(28),
            ..Default::default()
        };
        patch.apply_to_run(&mut props);
        assert!(props.bold);
        assert!(props.italic);
        assert_eq!(props.font_size, Some(28));
    }
}
