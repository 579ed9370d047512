use thiserror::Error;

/// Errors raised while reading or writing document bytes.
#[derive(Error, Debug)]
pub enum DomError {
    #[error("not an OOXML package: {0}")]
    Package(String),

    #[error("malformed XML in {part}: {detail}")]
    Xml { part: String, detail: String },

    #[error("invalid document structure: {0}")]
    Structure(String),
}

impl DomError {
    pub fn xml(part: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Xml {
            part: part.into(),
            detail: detail.into(),
        }
    }
}
