use thiserror::Error;

/// Errors surfaced by the document session core.
///
/// Every variant renders as a single sentence carrying the failing op or path
/// where applicable, so front-ends can forward messages verbatim.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session id or path resolves to nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed path string or patch JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// Path violates the nesting schema, or a value type mismatches its target segment.
    #[error("schema error: {0}")]
    Schema(String),

    /// Path parses but no matching element exists.
    #[error("cannot resolve {path}: {detail}")]
    Resolve {
        path: String,
        detail: String,
        /// Multiple matches where a singular reference was required.
        ambiguous: bool,
    },

    /// Optimistic-concurrency violation, e.g. an unacknowledged external change.
    #[error("conflict: {0}; call close then open to obtain the latest version")]
    Conflict(String),

    /// Filesystem or mmap failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Bytes are not a well-formed OOXML word-processing document.
    #[error("format error: {0}")]
    Format(String),

    /// Invariant breach.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn io(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Io(format!("{context}: {err}"))
    }

    pub fn resolve(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Resolve {
            path: path.into(),
            detail: detail.into(),
            ambiguous: false,
        }
    }

    pub fn ambiguous(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Resolve {
            path: path.into(),
            detail: detail.into(),
            ambiguous: true,
        }
    }

    /// Stable kind tag, for front-ends that map errors onto status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Parse(_) => "parse_error",
            Self::Schema(_) => "schema_error",
            Self::Resolve {
                ambiguous: true, ..
            } => "ambiguous",
            Self::Resolve { .. } => "resolve_error",
            Self::Conflict(_) => "conflict",
            Self::Io(_) => "io_error",
            Self::Format(_) => "format_error",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_single_sentence() {
        let err = SessionError::resolve("/body/paragraph[3]", "only 2 paragraphs in body");
        assert_eq!(
            err.to_string(),
            "cannot resolve /body/paragraph[3]: only 2 paragraphs in body"
        );
        assert_eq!(err.kind(), "resolve_error");
    }

    #[test]
    fn conflict_carries_recovery_hint() {
        let err = SessionError::Conflict("external change pending acknowledgement".into());
        assert!(err.to_string().contains("close then open"));
    }

    #[test]
    fn ambiguous_is_a_resolve_subkind() {
        let err = SessionError::ambiguous("/body/paragraph[text~='a']", "4 elements match");
        assert_eq!(err.kind(), "ambiguous");
    }
}
