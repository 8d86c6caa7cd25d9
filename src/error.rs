//! Library error type.
//!
//! Script failures are not errors: they come back as an `ExecutionResult`
//! carrying a `ClassifiedError`. The variants here cover caller bugs and
//! unexpected host failures only.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `${name}` placeholder had no value in the render context.
    #[error("missing template variable: {0}")]
    MissingTemplateVariable(String),

    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid script bundle {path}: {reason}")]
    InvalidBundle { path: PathBuf, reason: String },

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("dictionary unavailable: {0}")]
    DictionaryUnavailable(String),

    #[error("unsupported document encoding: {0}")]
    UnsupportedEncoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}
