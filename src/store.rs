//! Inbound, corrected and companion document directories.
//!
//! Files are joined by naming convention only: `<inbound>/<id>.json`,
//! `<corrected>/<id>.json`, `<companions>/<id>.pdf`.

use crate::atomic::atomic_write;
use crate::config::Directories;
use crate::document::{Document, DocumentId, Fields};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const DOCUMENT_EXTENSION: &str = "json";
const COMPANION_EXTENSION: &str = "pdf";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document '{0}' not found")]
    NotFound(DocumentId),

    #[error("document store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("document {0} is not a JSON object")]
    NotAnObject(PathBuf),

    #[error("failed to list {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A source file waiting in the inbound directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDocument {
    pub id: DocumentId,
    pub path: PathBuf,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    dirs: Directories,
}

impl DocumentStore {
    pub fn new(dirs: Directories) -> Self {
        Self { dirs }
    }

    pub fn directories(&self) -> &Directories {
        &self.dirs
    }

    pub fn inbound_path(&self, id: &DocumentId) -> PathBuf {
        document_path(&self.dirs.inbound, id)
    }

    pub fn corrected_path(&self, id: &DocumentId) -> PathBuf {
        document_path(&self.dirs.corrected, id)
    }

    /// Inbound `*.json` files, oldest first (ties broken by id).
    ///
    /// A missing inbound directory lists as empty. Files whose stem is not
    /// a valid id (for instance in-flight `.staged-*` files) are skipped.
    pub fn list_inbound(&self) -> Result<Vec<InboundDocument>, StoreError> {
        let dir = &self.dirs.inbound;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| StoreError::Walk {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|s| s.to_str()) != Some(DOCUMENT_EXTENSION)
            {
                continue;
            }
            let id = match DocumentId::from_path(path) {
                Ok(id) => id,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping inbound file");
                    continue;
                }
            };
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            docs.push(InboundDocument {
                id,
                path: path.to_path_buf(),
                modified,
            });
        }

        docs.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    pub fn exists(&self, id: &DocumentId) -> bool {
        self.inbound_path(id).is_file()
    }

    pub fn is_corrected(&self, id: &DocumentId) -> bool {
        self.corrected_path(id).is_file()
    }

    pub fn load_inbound(&self, id: &DocumentId) -> Result<Document, StoreError> {
        read_document(&self.inbound_path(id), id)
    }

    pub fn load_corrected(&self, id: &DocumentId) -> Result<Document, StoreError> {
        read_document(&self.corrected_path(id), id)
    }

    /// Atomically write the corrected version of `id` (pretty-printed JSON).
    pub fn write_corrected(&self, id: &DocumentId, fields: &Fields) -> Result<PathBuf, StoreError> {
        let path = self.corrected_path(id);
        let mut content = serde_json::to_vec_pretty(fields).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        content.push(b'\n');
        atomic_write(&path, &content).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(document = %id, path = %path.display(), "corrected document written");
        Ok(path)
    }

    /// Preview file for `id`, if one exists.
    pub fn companion_path(&self, id: &DocumentId) -> Option<PathBuf> {
        let path = self
            .dirs
            .companions
            .join(format!("{}.{COMPANION_EXTENSION}", id.as_str()));
        path.is_file().then_some(path)
    }
}

fn document_path(dir: &Path, id: &DocumentId) -> PathBuf {
    dir.join(format!("{}.{DOCUMENT_EXTENSION}", id.as_str()))
}

fn read_document(path: &Path, id: &DocumentId) -> Result<Document, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(id.clone()))
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value: Value = serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Document::from_value(id.clone(), value).ok_or_else(|| StoreError::NotAnObject(path.to_path_buf()))
}
