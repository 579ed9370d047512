use crate::error::DomError;
use crate::package::Package;
use crate::xml::{self, XmlElement};

pub const MAIN_PART_URI: &str = "word/document.xml";
pub const CONTENT_TYPES_URI: &str = "[Content_Types].xml";
pub const STYLES_URI: &str = "word/styles.xml";
pub const CORE_PROPS_URI: &str = "docProps/core.xml";

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
/// Private namespace carrying element ids, hyperlink targets and drawing
/// media references.
const DS_NS: &str = "http://schemas.docx-session.dev/2024/ids";

/// Whether to serialize the private element-id attribute.
///
/// `Strip` yields the content-only rendition used for change-detection
/// hashes; everything except `ds:eid` is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMode {
    Keep,
    Strip,
}

/// An editable word-processing document: the package plus the parsed main
/// body and any header/footer parts.
#[derive(Debug, Clone, PartialEq)]
pub struct WordDocument {
    package: Package,
    pub body: Body,
    pub headers: Vec<HeaderFooter>,
    pub footers: Vec<HeaderFooter>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub children: Vec<BodyChild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyChild {
    Paragraph(Paragraph),
    Table(Table),
    Section(SectionBreak),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paragraph {
    pub id: Option<String>,
    pub style: Option<String>,
    pub alignment: Option<String>,
    pub children: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Run(Run),
    Hyperlink(Hyperlink),
    Drawing(Drawing),
    Bookmark(Bookmark),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Run {
    pub id: Option<String>,
    pub props: RunProps,
    pub text: String,
    pub page_break: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunProps {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    /// Half-points, as WordprocessingML measures `w:sz`.
    pub font_size: Option<u32>,
    pub font_name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hyperlink {
    pub id: Option<String>,
    pub url: String,
    pub runs: Vec<Run>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drawing {
    pub id: Option<String>,
    /// Part URI of the embedded media, e.g. `word/media/image1.png`.
    pub media: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bookmark {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionBreak {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub id: Option<String>,
    pub style: Option<String>,
    pub border_style: Option<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRow {
    pub id: Option<String>,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableCell {
    pub id: Option<String>,
    pub blocks: Vec<BodyChild>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrFtrKind {
    Default,
    First,
    Even,
}

impl HdrFtrKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::First => "first",
            Self::Even => "even",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "first" => Some(Self::First),
            "even" => Some(Self::Even),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderFooter {
    pub kind: HdrFtrKind,
    pub part_uri: String,
    pub blocks: Vec<BodyChild>,
}

impl Paragraph {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            children: vec![Inline::Run(Run::new(text))],
            ..Default::default()
        }
    }

    /// Concatenated text of all runs, including hyperlink runs, whitespace
    /// preserved.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for inline in &self.children {
            match inline {
                Inline::Run(r) => out.push_str(&r.text),
                Inline::Hyperlink(h) => {
                    for r in &h.runs {
                        out.push_str(&r.text);
                    }
                }
                Inline::Drawing(_) | Inline::Bookmark(_) => {}
            }
        }
        out
    }

    /// Heading level 1..=9 when the paragraph style is `Heading<N>`.
    pub fn heading_level(&self) -> Option<u8> {
        let style = self.style.as_deref()?;
        let n: u8 = style.strip_prefix("Heading")?.parse().ok()?;
        (1..=9).contains(&n).then_some(n)
    }
}

impl Run {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

impl Table {
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|r| r.cells.len()).max().unwrap_or(0)
    }

    /// All cell text, row-major, for fingerprints and similarity.
    pub fn cell_text(&self) -> Vec<String> {
        self.rows
            .iter()
            .flat_map(|r| r.cells.iter().map(TableCell::text))
            .collect()
    }
}

impl TableCell {
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let BodyChild::Paragraph(p) = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&p.text());
            }
        }
        out
    }
}

impl BodyChild {
    pub fn element_id(&self) -> Option<&str> {
        match self {
            Self::Paragraph(p) => p.id.as_deref(),
            Self::Table(t) => t.id.as_deref(),
            Self::Section(s) => s.id.as_deref(),
        }
    }
}

impl WordDocument {
    /// A document with an empty body and the minimal part set.
    pub fn new_empty() -> Self {
        let mut package = Package::new();
        package.set_part(CONTENT_TYPES_URI, content_types_xml().into_bytes());
        let mut doc = Self {
            package,
            body: Body::default(),
            headers: Vec::new(),
            footers: Vec::new(),
        };
        doc.package
            .set_part(MAIN_PART_URI, doc.main_part_xml(IdMode::Keep).into_bytes());
        doc
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DomError> {
        let package = Package::from_bytes(bytes)?;
        let main = package
            .part_data(MAIN_PART_URI)
            .ok_or_else(|| DomError::Package(format!("missing {MAIN_PART_URI}")))?;
        let main = std::str::from_utf8(main)
            .map_err(|_| DomError::xml(MAIN_PART_URI, "main part is not UTF-8"))?;
        let root = xml::parse(main, MAIN_PART_URI)?;
        if root.name != "w:document" {
            return Err(DomError::Structure(format!(
                "main part root is <{}>, expected <w:document>",
                root.name
            )));
        }
        let body_elem = root
            .child("w:body")
            .ok_or_else(|| DomError::Structure("document has no <w:body>".into()))?;
        let body = Body {
            children: parse_blocks(body_elem)?,
        };

        let mut headers = Vec::new();
        let mut footers = Vec::new();
        for name in package.part_names().map(str::to_string).collect::<Vec<_>>() {
            let is_header = name.starts_with("word/header") && name.ends_with(".xml");
            let is_footer = name.starts_with("word/footer") && name.ends_with(".xml");
            if !is_header && !is_footer {
                continue;
            }
            let data = package.part_data(&name).unwrap_or_default();
            let text = std::str::from_utf8(data)
                .map_err(|_| DomError::xml(&name, "part is not UTF-8"))?;
            let root = xml::parse(text, &name)?;
            let kind = root
                .attr("ds:type")
                .and_then(HdrFtrKind::parse)
                .unwrap_or(HdrFtrKind::Default);
            let part = HeaderFooter {
                kind,
                part_uri: name.clone(),
                blocks: parse_blocks(&root)?,
            };
            if is_header {
                headers.push(part);
            } else {
                footers.push(part);
            }
        }

        Ok(Self {
            package,
            body,
            headers,
            footers,
        })
    }

    /// Serialize the current state back into package bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut package = self.package.clone();
        package.set_part(MAIN_PART_URI, self.main_part_xml(IdMode::Keep).into_bytes());
        for part in self.headers.iter().chain(self.footers.iter()) {
            package.set_part(
                part.part_uri.clone(),
                hdr_ftr_xml(part, IdMode::Keep).into_bytes(),
            );
        }
        package.to_bytes()
    }

    /// The main document part as XML. `IdMode::Strip` omits `ds:eid`
    /// attributes, yielding the content-only rendition.
    pub fn main_part_xml(&self, mode: IdMode) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push_str(&format!(r#"<w:document xmlns:w="{W_NS}" xmlns:ds="{DS_NS}">"#));
        if self.body.children.is_empty() {
            out.push_str("<w:body/>");
        } else {
            out.push_str("<w:body>");
            for child in &self.body.children {
                write_block(child, mode, &mut out);
            }
            out.push_str("</w:body>");
        }
        out.push_str("</w:document>");
        out
    }

    /// Parts other than the main document part, for uncovered-change
    /// comparison. Serializes header/footer parts from the live model first.
    pub fn auxiliary_parts(&self) -> Vec<(String, Vec<u8>)> {
        let mut package = self.package.clone();
        for part in self.headers.iter().chain(self.footers.iter()) {
            package.set_part(
                part.part_uri.clone(),
                hdr_ftr_xml(part, IdMode::Keep).into_bytes(),
            );
        }
        package
            .parts()
            .iter()
            .filter(|p| p.name != MAIN_PART_URI)
            .map(|p| (p.name.clone(), p.data.clone()))
            .collect()
    }

    /// Add a media part (e.g. image bytes), returning its part URI.
    pub fn add_media(&mut self, extension: &str, data: Vec<u8>) -> String {
        let n = self
            .package
            .part_names()
            .filter(|n| n.starts_with("word/media/"))
            .count()
            + 1;
        let uri = format!("word/media/image{n}.{extension}");
        self.package.set_part(uri.clone(), data);
        uri
    }
}

fn content_types_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/{MAIN_PART_URI}" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#
    )
}

fn hdr_ftr_xml(part: &HeaderFooter, mode: IdMode) -> String {
    let tag = if part.part_uri.starts_with("word/header") {
        "w:hdr"
    } else {
        "w:ftr"
    };
    let mut out = String::with_capacity(256);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push_str(&format!(
        r#"<{tag} xmlns:w="{W_NS}" xmlns:ds="{DS_NS}" ds:type="{}">"#,
        part.kind.as_str()
    ));
    for block in &part.blocks {
        write_block(block, mode, &mut out);
    }
    out.push_str(&format!("</{tag}>"));
    out
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_blocks(parent: &XmlElement) -> Result<Vec<BodyChild>, DomError> {
    let mut out = Vec::new();
    for elem in parent.elements() {
        match elem.name.as_str() {
            "w:p" => out.push(BodyChild::Paragraph(parse_paragraph(elem)?)),
            "w:tbl" => out.push(BodyChild::Table(parse_table(elem)?)),
            "w:sectPr" => out.push(BodyChild::Section(SectionBreak {
                id: elem.attr("ds:eid").map(str::to_string),
            })),
            _ => {}
        }
    }
    Ok(out)
}

fn parse_paragraph(elem: &XmlElement) -> Result<Paragraph, DomError> {
    let mut paragraph = Paragraph {
        id: elem.attr("ds:eid").map(str::to_string),
        ..Default::default()
    };
    for child in elem.elements() {
        match child.name.as_str() {
            "w:pPr" => {
                paragraph.style = child
                    .child("w:pStyle")
                    .and_then(|s| s.attr("w:val"))
                    .map(str::to_string);
                paragraph.alignment = child
                    .child("w:jc")
                    .and_then(|s| s.attr("w:val"))
                    .map(str::to_string);
            }
            "w:r" => paragraph.children.push(Inline::Run(parse_run(child))),
            "w:hyperlink" => {
                let runs = child
                    .elements()
                    .filter(|e| e.name == "w:r")
                    .map(parse_run)
                    .collect();
                paragraph.children.push(Inline::Hyperlink(Hyperlink {
                    id: child.attr("ds:eid").map(str::to_string),
                    url: child.attr("ds:url").unwrap_or_default().to_string(),
                    runs,
                }));
            }
            "w:drawing" => {
                paragraph.children.push(Inline::Drawing(Drawing {
                    id: child.attr("ds:eid").map(str::to_string),
                    media: child.attr("ds:media").unwrap_or_default().to_string(),
                    width: child.attr("ds:cx").and_then(|v| v.parse().ok()),
                    height: child.attr("ds:cy").and_then(|v| v.parse().ok()),
                    alt: child.attr("ds:alt").map(str::to_string),
                }));
            }
            "w:bookmarkStart" => {
                paragraph.children.push(Inline::Bookmark(Bookmark {
                    id: child.attr("ds:eid").map(str::to_string),
                    name: child.attr("w:name").unwrap_or_default().to_string(),
                }));
            }
            _ => {}
        }
    }
    Ok(paragraph)
}

fn parse_run(elem: &XmlElement) -> Run {
    let mut run = Run {
        id: elem.attr("ds:eid").map(str::to_string),
        ..Default::default()
    };
    for child in elem.elements() {
        match child.name.as_str() {
            "w:rPr" => {
                run.props = RunProps {
                    bold: child.child("w:b").is_some(),
                    italic: child.child("w:i").is_some(),
                    underline: child.child("w:u").is_some(),
                    strike: child.child("w:strike").is_some(),
                    font_size: child
                        .child("w:sz")
                        .and_then(|s| s.attr("w:val"))
                        .and_then(|v| v.parse().ok()),
                    font_name: child
                        .child("w:rFonts")
                        .and_then(|s| s.attr("w:ascii"))
                        .map(str::to_string),
                    color: child
                        .child("w:color")
                        .and_then(|s| s.attr("w:val"))
                        .map(str::to_string),
                };
            }
            "w:t" => run.text.push_str(&child.text()),
            "w:br" => {
                if child.attr("w:type") == Some("page") {
                    run.page_break = true;
                }
            }
            _ => {}
        }
    }
    run
}

fn parse_table(elem: &XmlElement) -> Result<Table, DomError> {
    let mut table = Table {
        id: elem.attr("ds:eid").map(str::to_string),
        ..Default::default()
    };
    for child in elem.elements() {
        match child.name.as_str() {
            "w:tblPr" => {
                table.style = child
                    .child("w:tblStyle")
                    .and_then(|s| s.attr("w:val"))
                    .map(str::to_string);
                table.border_style = child
                    .child("w:tblBorders")
                    .and_then(|s| s.attr("ds:val"))
                    .map(str::to_string);
            }
            "w:tr" => {
                let mut row = TableRow {
                    id: child.attr("ds:eid").map(str::to_string),
                    ..Default::default()
                };
                for tc in child.elements().filter(|e| e.name == "w:tc") {
                    row.cells.push(TableCell {
                        id: tc.attr("ds:eid").map(str::to_string),
                        blocks: parse_blocks(tc)?,
                    });
                }
                table.rows.push(row);
            }
            _ => {}
        }
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

fn push_id(id: &Option<String>, mode: IdMode, out: &mut String) {
    if mode == IdMode::Strip {
        return;
    }
    if let Some(id) = id {
        out.push_str(" ds:eid=\"");
        xml::escape_attr(id, out);
        out.push('"');
    }
}

pub(crate) fn write_block(child: &BodyChild, mode: IdMode, out: &mut String) {
    match child {
        BodyChild::Paragraph(p) => write_paragraph(p, mode, out),
        BodyChild::Table(t) => write_table(t, mode, out),
        BodyChild::Section(s) => {
            out.push_str("<w:sectPr");
            push_id(&s.id, mode, out);
            out.push_str("/>");
        }
    }
}

fn write_paragraph(p: &Paragraph, mode: IdMode, out: &mut String) {
    out.push_str("<w:p");
    push_id(&p.id, mode, out);
    if p.style.is_none() && p.alignment.is_none() && p.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if p.style.is_some() || p.alignment.is_some() {
        out.push_str("<w:pPr>");
        if let Some(style) = &p.style {
            out.push_str("<w:pStyle w:val=\"");
            xml::escape_attr(style, out);
            out.push_str("\"/>");
        }
        if let Some(jc) = &p.alignment {
            out.push_str("<w:jc w:val=\"");
            xml::escape_attr(jc, out);
            out.push_str("\"/>");
        }
        out.push_str("</w:pPr>");
    }
    for inline in &p.children {
        match inline {
            Inline::Run(r) => write_run(r, mode, out),
            Inline::Hyperlink(h) => {
                out.push_str("<w:hyperlink");
                push_id(&h.id, mode, out);
                out.push_str(" ds:url=\"");
                xml::escape_attr(&h.url, out);
                out.push_str("\">");
                for r in &h.runs {
                    write_run(r, mode, out);
                }
                out.push_str("</w:hyperlink>");
            }
            Inline::Drawing(d) => {
                out.push_str("<w:drawing");
                push_id(&d.id, mode, out);
                out.push_str(" ds:media=\"");
                xml::escape_attr(&d.media, out);
                out.push('"');
                if let Some(w) = d.width {
                    out.push_str(&format!(" ds:cx=\"{w}\""));
                }
                if let Some(h) = d.height {
                    out.push_str(&format!(" ds:cy=\"{h}\""));
                }
                if let Some(alt) = &d.alt {
                    out.push_str(" ds:alt=\"");
                    xml::escape_attr(alt, out);
                    out.push('"');
                }
                out.push_str("/>");
            }
            Inline::Bookmark(b) => {
                out.push_str("<w:bookmarkStart");
                push_id(&b.id, mode, out);
                out.push_str(" w:name=\"");
                xml::escape_attr(&b.name, out);
                out.push_str("\"/>");
            }
        }
    }
    out.push_str("</w:p>");
}

fn write_run(r: &Run, mode: IdMode, out: &mut String) {
    out.push_str("<w:r");
    push_id(&r.id, mode, out);
    out.push('>');
    if r.props != RunProps::default() {
        out.push_str("<w:rPr>");
        if r.props.bold {
            out.push_str("<w:b/>");
        }
        if r.props.italic {
            out.push_str("<w:i/>");
        }
        if r.props.underline {
            out.push_str("<w:u w:val=\"single\"/>");
        }
        if r.props.strike {
            out.push_str("<w:strike/>");
        }
        if let Some(sz) = r.props.font_size {
            out.push_str(&format!("<w:sz w:val=\"{sz}\"/>"));
        }
        if let Some(font) = &r.props.font_name {
            out.push_str("<w:rFonts w:ascii=\"");
            xml::escape_attr(font, out);
            out.push_str("\"/>");
        }
        if let Some(color) = &r.props.color {
            out.push_str("<w:color w:val=\"");
            xml::escape_attr(color, out);
            out.push_str("\"/>");
        }
        out.push_str("</w:rPr>");
    }
    if r.page_break {
        out.push_str("<w:br w:type=\"page\"/>");
    }
    if !r.text.is_empty() {
        out.push_str("<w:t xml:space=\"preserve\">");
        xml::escape_text(&r.text, out);
        out.push_str("</w:t>");
    }
    out.push_str("</w:r>");
}

fn write_table(t: &Table, mode: IdMode, out: &mut String) {
    out.push_str("<w:tbl");
    push_id(&t.id, mode, out);
    out.push('>');
    if t.style.is_some() || t.border_style.is_some() {
        out.push_str("<w:tblPr>");
        if let Some(style) = &t.style {
            out.push_str("<w:tblStyle w:val=\"");
            xml::escape_attr(style, out);
            out.push_str("\"/>");
        }
        if let Some(border) = &t.border_style {
            out.push_str("<w:tblBorders ds:val=\"");
            xml::escape_attr(border, out);
            out.push_str("\"/>");
        }
        out.push_str("</w:tblPr>");
    }
    for row in &t.rows {
        out.push_str("<w:tr");
        push_id(&row.id, mode, out);
        out.push('>');
        for cell in &row.cells {
            out.push_str("<w:tc");
            push_id(&cell.id, mode, out);
            out.push('>');
            for block in &cell.blocks {
                write_block(block, mode, out);
            }
            out.push_str("</w:tc>");
        }
        out.push_str("</w:tr>");
    }
    out.push_str("</w:tbl>");
}
