use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Definition is not shaped like a schema (wrong JSON types).
    Malformed,
    MissingType,
    MissingLabel,
    UnsupportedType,
    InvalidConstraint,
    EmptyChoices,
    MissingItems,
    UnsupportedNesting,
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaErrorKind::Malformed => "malformed definition",
            SchemaErrorKind::MissingType => "missing type",
            SchemaErrorKind::MissingLabel => "missing label",
            SchemaErrorKind::UnsupportedType => "unsupported type",
            SchemaErrorKind::InvalidConstraint => "invalid constraint",
            SchemaErrorKind::EmptyChoices => "empty choices",
            SchemaErrorKind::MissingItems => "missing items",
            SchemaErrorKind::UnsupportedNesting => "unsupported nesting",
        };
        f.write_str(name)
    }
}

/// A schema definition rejected at parse time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at '{path}': {message}")]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    /// Field path (`line_items[].quantity`); empty for the definition root.
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub(crate) fn new(
        kind: SchemaErrorKind,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SchemaLoadError {
    #[error("failed to read schema from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema JSON ({path}): {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse schema TOML ({path}): {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("unsupported schema file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("invalid schema ({path}): {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
}
