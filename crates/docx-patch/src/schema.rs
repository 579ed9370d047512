//! Static nesting schema for typed paths.
//!
//! The table says which segment kinds may appear under which parents; the
//! validation pass also checks selector applicability (`level=` on headings,
//! `type=` on headers/footers) and the placement rules for `children`,
//! `style`, and the virtual segments.

use docx_session_core::SessionError;

use crate::path::{SegmentKind, Selector, TypedPath};

/// Kinds allowed at the path root.
const ROOT_KINDS: &[SegmentKind] = &[SegmentKind::Body, SegmentKind::Metadata, SegmentKind::Styles];

/// Children allowed under each parent kind.
pub fn allowed_children(parent: SegmentKind) -> &'static [SegmentKind] {
    use SegmentKind::*;
    match parent {
        Body => &[
            Paragraph, Heading, Table, Section, Drawing, Children, Style, Header, Footer,
            Bookmark, Footnote,
        ],
        Table => &[Row, Style],
        Row => &[Cell],
        Cell => &[Paragraph, Heading, Table, Children],
        Paragraph | Heading => &[Run, Hyperlink, Drawing, Style, Bookmark, Comment],
        Run | Hyperlink => &[Style],
        Header | Footer => &[Paragraph, Heading, Table, Children],
        Section | Drawing | Bookmark | Comment | Footnote | Style | Children | Metadata
        | Styles => &[],
    }
}

/// Validate a parsed path against the nesting schema.
pub fn validate(path: &TypedPath) -> Result<(), SessionError> {
    let first = &path.segments[0];
    if !ROOT_KINDS.contains(&first.kind) {
        return Err(SessionError::Schema(format!(
            "in path {:?}: {:?} cannot start a path; paths start at 'body', 'metadata' or 'styles'",
            path.raw,
            first.kind.as_str()
        )));
    }

    for window in path.segments.windows(2) {
        let (parent, child) = (&window[0], &window[1]);
        if !allowed_children(parent.kind).contains(&child.kind) {
            return Err(SessionError::Schema(format!(
                "in path {:?}: segment {:?} is not allowed under {:?}",
                path.raw,
                child.kind.as_str(),
                parent.kind.as_str()
            )));
        }
    }

    for (i, segment) in path.segments.iter().enumerate() {
        let is_last = i == path.segments.len() - 1;
        match segment.kind {
            SegmentKind::Children => {
                if !is_last {
                    return Err(SessionError::Schema(format!(
                        "in path {:?}: 'children' must be the final segment",
                        path.raw
                    )));
                }
                match segment.selector {
                    Some(Selector::Index(n)) if n >= 0 => {}
                    _ => {
                        return Err(SessionError::Schema(format!(
                            "in path {:?}: 'children' requires a non-negative index",
                            path.raw
                        )))
                    }
                }
            }
            SegmentKind::Style => {
                if !is_last {
                    return Err(SessionError::Schema(format!(
                        "in path {:?}: 'style' must be the final segment",
                        path.raw
                    )));
                }
                if segment.selector.is_some() {
                    return Err(SessionError::Schema(format!(
                        "in path {:?}: 'style' takes no selector",
                        path.raw
                    )));
                }
            }
            SegmentKind::Metadata | SegmentKind::Styles => {
                if path.segments.len() != 1 {
                    return Err(SessionError::Schema(format!(
                        "in path {:?}: {:?} is a read-only virtual segment and stands alone",
                        path.raw,
                        segment.kind.as_str()
                    )));
                }
            }
            _ => {}
        }

        if let Some(selector) = &segment.selector {
            validate_selector(segment.kind, selector, &path.raw)?;
        }
    }

    Ok(())
}

fn validate_selector(
    kind: SegmentKind,
    selector: &Selector,
    raw: &str,
) -> Result<(), SessionError> {
    match selector {
        Selector::Level(_) if kind != SegmentKind::Heading => Err(SessionError::Schema(format!(
            "in path {raw:?}: 'level=' applies only to headings, not {:?}",
            kind.as_str()
        ))),
        Selector::HdrFtrType(_)
            if !matches!(kind, SegmentKind::Header | SegmentKind::Footer) =>
        {
            Err(SessionError::Schema(format!(
                "in path {raw:?}: 'type=' applies only to headers and footers, not {:?}",
                kind.as_str()
            )))
        }
        Selector::Style(_)
            if !matches!(
                kind,
                SegmentKind::Paragraph | SegmentKind::Heading | SegmentKind::Table
            ) =>
        {
            Err(SessionError::Schema(format!(
                "in path {raw:?}: 'style=' applies only to paragraphs, headings and tables"
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;

    fn check(raw: &str) -> Result<(), SessionError> {
        validate(&parse_path(raw).unwrap())
    }

    #[test]
    fn accepts_valid_nestings() {
        for raw in [
            "/body",
            "/body/paragraph[0]",
            "/body/paragraph[0]/run[1]/style",
            "/body/table[0]/row[-1]/cell[0]/paragraph[0]",
            "/body/table[0]/row[0]/cell[0]/children/0",
            "/body/heading[level=2]",
            "/body/header[type='first']/paragraph[0]",
            "/body/children/4",
            "/metadata",
            "/styles",
        ] {
            assert!(check(raw).is_ok(), "{raw}");
        }
    }

    #[test]
    fn rejects_invalid_nestings_with_context() {
        let err = check("/body/row[0]").unwrap_err();
        assert!(err.to_string().contains("row"));
        assert!(err.to_string().contains("body"));

        let err = check("/body/table[0]/paragraph[0]").unwrap_err();
        assert!(err.to_string().contains("paragraph"));
        assert!(err.to_string().contains("table"));
    }

    #[test]
    fn rejects_root_violations() {
        assert!(check("/paragraph[0]").is_err());
        assert!(check("/metadata").is_ok());
    }

    #[test]
    fn children_placement_rules() {
        assert!(check("/body/children/0").is_ok());
        assert!(check("/body/children").is_err());
        assert!(check("/body/children/0/run[0]").is_err());
        assert!(check("/body/paragraph[0]/children/0").is_err());
    }

    #[test]
    fn selector_applicability() {
        assert!(check("/body/paragraph[level=2]").is_err());
        assert!(check("/body/paragraph[type='default']").is_err());
        assert!(check("/body/run[0]").is_err());
    }

}
