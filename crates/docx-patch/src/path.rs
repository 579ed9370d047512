//! Typed path syntax.
//!
//! ```text
//! /body/paragraph[2]/run[0]
//! /body/heading[level=2]
//! /body/table[id='k3xg71ab']/row[-1]/cell[0]
//! /body/paragraph[text~='revenue']
//! /body/children/0
//! ```

use docx_session_core::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Body,
    Paragraph,
    Heading,
    Table,
    Row,
    Cell,
    Run,
    Drawing,
    Hyperlink,
    Bookmark,
    Comment,
    Footnote,
    Section,
    Header,
    Footer,
    Style,
    /// Positional insert target; only valid as the final segment.
    Children,
    /// Read-only virtual segments.
    Metadata,
    Styles,
}

impl SegmentKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "body" => Self::Body,
            "paragraph" => Self::Paragraph,
            "heading" => Self::Heading,
            "table" => Self::Table,
            "row" => Self::Row,
            "cell" => Self::Cell,
            "run" => Self::Run,
            "drawing" => Self::Drawing,
            "hyperlink" => Self::Hyperlink,
            "bookmark" => Self::Bookmark,
            "comment" => Self::Comment,
            "footnote" => Self::Footnote,
            "section" => Self::Section,
            "header" => Self::Header,
            "footer" => Self::Footer,
            "style" => Self::Style,
            "children" => Self::Children,
            "metadata" => Self::Metadata,
            "styles" => Self::Styles,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::Table => "table",
            Self::Row => "row",
            Self::Cell => "cell",
            Self::Run => "run",
            Self::Drawing => "drawing",
            Self::Hyperlink => "hyperlink",
            Self::Bookmark => "bookmark",
            Self::Comment => "comment",
            Self::Footnote => "footnote",
            Self::Section => "section",
            Self::Header => "header",
            Self::Footer => "footer",
            Self::Style => "style",
            Self::Children => "children",
            Self::Metadata => "metadata",
            Self::Styles => "styles",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// By index among children of the segment kind; negatives count from the end.
    Index(i64),
    /// By assigned element id.
    Id(String),
    /// Exact match on concatenated text content.
    TextExact(String),
    /// Substring match on concatenated text content.
    TextContains(String),
    /// By style name.
    Style(String),
    /// Headings only.
    Level(u32),
    /// Headers/footers only: `default`, `first`, or `even`.
    HdrFtrType(String),
    /// All matches; query only.
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedPath {
    pub raw: String,
    pub segments: Vec<Segment>,
}

/// Parse a path string. Structural (nesting) validity is checked separately
/// by the schema pass.
pub fn parse_path(input: &str) -> Result<TypedPath, SessionError> {
    let rest = input
        .strip_prefix('/')
        .ok_or_else(|| SessionError::Parse(format!("path {input:?} must start with '/'")))?;
    if rest.is_empty() {
        return Err(SessionError::Parse(format!(
            "path {input:?} names no segments"
        )));
    }

    let mut segments: Vec<Segment> = Vec::new();
    for token in split_segments(rest, input)? {
        // A bare integer directly after `children` is the insertion index:
        // `/body/children/3` reads as children[3].
        if let Ok(index) = token.parse::<i64>() {
            match segments.last_mut() {
                Some(seg) if seg.kind == SegmentKind::Children && seg.selector.is_none() => {
                    seg.selector = Some(Selector::Index(index));
                    continue;
                }
                _ => {
                    return Err(SessionError::Parse(format!(
                        "in path {input:?}: bare index {token:?} is only valid after 'children'"
                    )))
                }
            }
        }
        segments.push(parse_segment(&token, input)?);
    }

    Ok(TypedPath {
        raw: input.to_string(),
        segments,
    })
}

/// Split on '/' outside quoted selector strings.
fn split_segments(rest: &str, full: &str) -> Result<Vec<String>, SessionError> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in rest.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '/' if !in_quote => {
                if current.is_empty() {
                    return Err(SessionError::Parse(format!(
                        "path {full:?} contains an empty segment"
                    )));
                }
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if in_quote {
        return Err(SessionError::Parse(format!(
            "path {full:?} has an unterminated quoted string"
        )));
    }
    if current.is_empty() {
        return Err(SessionError::Parse(format!(
            "path {full:?} ends with a trailing '/'"
        )));
    }
    out.push(current);
    Ok(out)
}

fn parse_segment(token: &str, full: &str) -> Result<Segment, SessionError> {
    let (name, selector_src) = match token.find('[') {
        Some(open) => {
            let close = token
                .rfind(']')
                .filter(|&c| c == token.len() - 1)
                .ok_or_else(|| {
                    SessionError::Parse(format!(
                        "in path {full:?}: segment {token:?} has an unclosed selector"
                    ))
                })?;
            (&token[..open], Some(&token[open + 1..close]))
        }
        None => (token, None),
    };

    let kind = SegmentKind::parse(name).ok_or_else(|| {
        SessionError::Parse(format!(
            "in path {full:?}: unknown segment name {name:?}"
        ))
    })?;

    let selector = match selector_src {
        None => None,
        Some(src) => Some(parse_selector(src, token, full)?),
    };

    Ok(Segment { kind, selector })
}

fn parse_selector(src: &str, token: &str, full: &str) -> Result<Selector, SessionError> {
    let err = |detail: String| {
        SessionError::Parse(format!("in path {full:?}: segment {token:?}: {detail}"))
    };

    if src == "*" {
        return Ok(Selector::Wildcard);
    }
    if let Ok(index) = src.parse::<i64>() {
        return Ok(Selector::Index(index));
    }
    if let Some(value) = quoted_value(src, "id=") {
        return Ok(Selector::Id(value?));
    }
    if let Some(value) = quoted_value(src, "text~=") {
        return Ok(Selector::TextContains(value?));
    }
    if let Some(value) = quoted_value(src, "text=") {
        return Ok(Selector::TextExact(value?));
    }
    if let Some(value) = quoted_value(src, "style=") {
        return Ok(Selector::Style(value?));
    }
    if let Some(rest) = src.strip_prefix("level=") {
        let level: u32 = rest
            .parse()
            .map_err(|_| err(format!("invalid heading level {rest:?}")))?;
        return Ok(Selector::Level(level));
    }
    if let Some(rest) = src.strip_prefix("type=") {
        // Accept both bare and quoted forms.
        let rest = rest
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .unwrap_or(rest);
        if matches!(rest, "default" | "first" | "even") {
            return Ok(Selector::HdrFtrType(rest.to_string()));
        }
        return Err(err(format!(
            "type must be 'default', 'first' or 'even', got {rest:?}"
        )));
    }
    Err(err(format!("unrecognized selector {src:?}")))
}

/// `id='value'` style selectors; returns None when the prefix doesn't match.
fn quoted_value(src: &str, prefix: &str) -> Option<Result<String, SessionError>> {
    let rest = src.strip_prefix(prefix)?;
    let inner = rest
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .ok_or_else(|| {
            SessionError::Parse(format!(
                "selector {src:?} value must be single-quoted"
            ))
        });
    Some(inner.map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_segments() {
        let path = parse_path("/body/paragraph[2]/run[0]").unwrap();
        assert_eq!(path.segments.len(), 3);
        assert_eq!(path.segments[0].kind, SegmentKind::Body);
        assert_eq!(path.segments[1].selector, Some(Selector::Index(2)));
    }

    #[test]
    fn parses_children_with_bare_index() {
        let path = parse_path("/body/children/0").unwrap();
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[1].kind, SegmentKind::Children);
        assert_eq!(path.segments[1].selector, Some(Selector::Index(0)));

        // Bracketed form is equivalent.
        assert_eq!(parse_path("/body/children[0]").unwrap().segments, path.segments);
    }

    #[test]
    fn parses_quoted_selectors_containing_slash() {
        let path = parse_path("/body/paragraph[text~='a/b']").unwrap();
        assert_eq!(
            path.segments[1].selector,
            Some(Selector::TextContains("a/b".into()))
        );
    }

    #[test]
    fn parses_each_selector_form() {
        let cases = [
            ("/body/paragraph[-1]", Selector::Index(-1)),
            ("/body/table[id='a1b2c3d4']", Selector::Id("a1b2c3d4".into())),
            ("/body/paragraph[text='exact']", Selector::TextExact("exact".into())),
            ("/body/paragraph[style='Quote']", Selector::Style("Quote".into())),
            ("/body/heading[level=3]", Selector::Level(3)),
            ("/body/header[type='default']", Selector::HdrFtrType("default".into())),
            ("/body/paragraph[*]", Selector::Wildcard),
        ];
        for (raw, expected) in cases {
            let path = parse_path(raw).unwrap();
            assert_eq!(path.segments[1].selector.as_ref(), Some(&expected), "{raw}");
        }
    }

    #[test]
    fn rejects_malformed_paths() {
        for raw in [
            "body/paragraph[0]",
            "/",
            "/body//paragraph",
            "/body/paragraph[",
            "/body/paragraph[text~='open",
            "/body/widget[0]",
            "/body/paragraph[weight=3]",
            "/body/0",
        ] {
            let err = parse_path(raw).unwrap_err();
            assert_eq!(err.kind(), "parse_error", "{raw}");
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn header_type_values_are_checked() {
        assert!(parse_path("/body/header[type='odd']").is_err());
    }
}
