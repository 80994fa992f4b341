use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Field name to value mapping of a document.
pub type Fields = Map<String, Value>;

/// Stable identifier of a document, derived from its source file's base name.
///
/// The identifier joins the inbound store, corrected store, lock store and
/// any preview companion by naming convention, so it must be usable as a
/// single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentIdError {
    #[error("document id is empty")]
    Empty,

    #[error("document id '{0}' contains a path separator")]
    PathSeparator(String),

    #[error("document id '{0}' must not start with '.'")]
    Hidden(String),

    #[error("path has no usable file stem: {0}")]
    NoStem(String),
}

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self, DocumentIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DocumentIdError::Empty);
        }
        if id.contains(['/', '\\', '\0']) {
            return Err(DocumentIdError::PathSeparator(id));
        }
        // Leading dots are reserved for store-internal files (tombstones, audit lease).
        if id.starts_with('.') {
            return Err(DocumentIdError::Hidden(id));
        }
        Ok(Self(id))
    }

    /// Derive the id from a source file path (`json_docs/invoice_7.json` → `invoice_7`).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentIdError> {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DocumentIdError::NoStem(path.display().to_string()))?;
        Self::new(stem)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DocumentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

/// A document under review: its identifier and field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: DocumentId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Build a document from a JSON value, which must be an object.
    pub fn from_value(id: DocumentId, value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { id, fields }),
            _ => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
