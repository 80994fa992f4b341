//! Append-only record of accepted corrections.
//!
//! One entry per line: `<xxh3-64 hex> <compact json>\n`. A line only counts
//! once its newline is on disk and its checksum matches, so a torn or
//! corrupted tail never reads back as a complete entry. Appenders from any
//! number of processes serialize through a short lease taken with the same
//! [`LockManager`] that guards documents.

use crate::clock::Clock;
use crate::config::AuditSettings;
use crate::diff::{ChangeSummary, Diff};
use crate::document::{DocumentId, DocumentIdError, Fields};
use crate::lock::{Lock, LockError, LockManager};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

pub const ACTION_CORRECTED: &str = "corrected";

static APPENDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// One committed correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub document_id: DocumentId,
    pub holder_id: String,
    pub committed_at: DateTime<Utc>,
    #[serde(default)]
    pub schema_title: Option<String>,
    pub action: String,
    pub original: Fields,
    pub corrected: Fields,
    pub diff: Diff,
    pub summary: ChangeSummary,
}

impl AuditEntry {
    pub fn correction(
        document_id: DocumentId,
        holder_id: impl Into<String>,
        committed_at: DateTime<Utc>,
        original: Fields,
        corrected: Fields,
        diff: Diff,
    ) -> Self {
        let summary = diff.summary();
        Self {
            document_id,
            holder_id: holder_id.into(),
            committed_at,
            schema_title: None,
            action: ACTION_CORRECTED.to_string(),
            original,
            corrected,
            diff,
            summary,
        }
    }

    pub fn with_schema_title(mut self, title: impl Into<String>) -> Self {
        self.schema_title = Some(title.into());
        self
    }
}

/// Selects entries on read. Every set criterion must match; `since` is
/// inclusive, `until` exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub document_id: Option<DocumentId>,
    pub holder_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn document(mut self, id: DocumentId) -> Self {
        self.document_id = Some(id);
        self
    }

    pub fn holder(mut self, holder: impl Into<String>) -> Self {
        self.holder_id = Some(holder.into());
        self
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.since = Some(at);
        self
    }

    pub fn until(mut self, at: DateTime<Utc>) -> Self {
        self.until = Some(at);
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.document_id
            .as_ref()
            .map_or(true, |id| *id == entry.document_id)
            && self
                .holder_id
                .as_deref()
                .map_or(true, |h| h == entry.holder_id)
            && self.since.map_or(true, |t| entry.committed_at >= t)
            && self.until.map_or(true, |t| entry.committed_at < t)
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode audit entry: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("audit line {line} in {path} is not a valid entry: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("audit log is busy; no append lease after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error("audit lease failed: {0}")]
    Lease(#[from] LockError),

    #[error("invalid audit file name: {0}")]
    FileName(#[from] DocumentIdError),

    #[error("failed to export audit entries: {0}")]
    Export(#[from] csv::Error),
}

/// Output shape for [`export_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One flat row per entry with the change counts; no snapshots.
    Csv,
    /// Pretty JSON array of complete entries.
    Json,
}

#[derive(Serialize)]
struct ExportRow<'a> {
    document_id: &'a str,
    committed_at: String,
    holder_id: &'a str,
    action: &'a str,
    schema_title: &'a str,
    has_changes: bool,
    total_changes: usize,
    modified_fields: usize,
    added_fields: usize,
    removed_fields: usize,
}

impl<'a> From<&'a AuditEntry> for ExportRow<'a> {
    fn from(entry: &'a AuditEntry) -> Self {
        Self {
            document_id: entry.document_id.as_str(),
            committed_at: entry.committed_at.to_rfc3339(),
            holder_id: &entry.holder_id,
            action: &entry.action,
            schema_title: entry.schema_title.as_deref().unwrap_or_default(),
            has_changes: entry.summary.total > 0,
            total_changes: entry.summary.total,
            modified_fields: entry.summary.modified,
            added_fields: entry.summary.added,
            removed_fields: entry.summary.removed,
        }
    }
}

/// Write `entries` to `out` in `format`.
///
/// CSV always carries the header row, even with no entries.
pub fn export_entries<W: Write>(
    entries: &[AuditEntry],
    format: ExportFormat,
    mut out: W,
) -> Result<(), AuditError> {
    match format {
        ExportFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(out);
            writer.write_record([
                "document_id",
                "committed_at",
                "holder_id",
                "action",
                "schema_title",
                "has_changes",
                "total_changes",
                "modified_fields",
                "added_fields",
                "removed_fields",
            ])?;
            for entry in entries {
                writer.serialize(ExportRow::from(entry))?;
            }
            writer.flush().map_err(csv::Error::from)?;
        }
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut out, entries).map_err(AuditError::Encode)?;
            out.write_all(b"\n")
                .map_err(|e| AuditError::Encode(serde_json::Error::io(e)))?;
        }
    }
    tracing::debug!(entries = entries.len(), ?format, "audit entries exported");
    Ok(())
}

/// The audit sequence stored in one file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    lease_id: DocumentId,
    leases: LockManager,
    settings: AuditSettings,
}

impl AuditLog {
    /// Log at `<dir>/<settings.file_name>`; `dir` must already exist.
    pub fn open(
        dir: impl AsRef<Path>,
        settings: AuditSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuditError> {
        let dir = dir.as_ref();
        let lease_id = DocumentId::new(settings.file_name.clone())?;
        Ok(Self {
            path: dir.join(&settings.file_name),
            lease_id,
            leases: LockManager::new(dir, clock),
            settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self) -> impl FnOnce(io::Error) -> AuditError + '_ {
        move |source| AuditError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one entry durably.
    ///
    /// Returns only after the line is flushed to disk. Waits (bounded by
    /// `append_attempts`) while another appender holds the lease.
    pub fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let json = serde_json::to_string(entry).map_err(AuditError::Encode)?;
        let line = format!("{:016x} {json}\n", xxh3_64(json.as_bytes()));

        let lease = self.acquire_lease()?;
        let written = self.write_line(line.as_bytes());
        if let Err(e) = self.leases.release(&lease) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release audit lease");
        }
        written?;

        tracing::info!(
            document = %entry.document_id,
            holder = %entry.holder_id,
            changes = entry.summary.total,
            "audit entry appended"
        );
        Ok(())
    }

    fn acquire_lease(&self) -> Result<Lock, AuditError> {
        let holder = format!(
            "appender-{}-{}",
            std::process::id(),
            APPENDER_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let lease_seconds = i64::try_from(self.settings.lease_seconds).unwrap_or(i64::MAX);
        let ttl = Duration::seconds(lease_seconds.min(i64::MAX / 1000));
        let delay = std::time::Duration::from_millis(self.settings.retry_delay_ms);

        for attempt in 1..=self.settings.append_attempts {
            match self.leases.claim(&self.lease_id, &holder, ttl) {
                Ok(lease) => return Ok(lease),
                Err(LockError::AlreadyLocked { .. } | LockError::Contended { .. }) => {
                    if attempt < self.settings.append_attempts {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AuditError::Busy {
            attempts: self.settings.append_attempts,
        })
    }

    fn write_line(&self, line: &[u8]) -> Result<(), AuditError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(self.io_error())?;

        // A previous appender may have died mid-line; start on a fresh one.
        if ends_without_newline(&mut file).map_err(self.io_error())? {
            tracing::warn!(path = %self.path.display(), "sealing torn audit line");
            file.write_all(b"\n").map_err(self.io_error())?;
        }

        file.write_all(line).map_err(self.io_error())?;
        file.sync_data().map_err(self.io_error())?;
        Ok(())
    }

    /// Export matching entries in append order.
    pub fn export<W: Write>(
        &self,
        filter: AuditFilter,
        format: ExportFormat,
        out: W,
    ) -> Result<usize, AuditError> {
        let entries = self.read(filter)?.collect::<Result<Vec<_>, _>>()?;
        export_entries(&entries, format, out)?;
        Ok(entries.len())
    }

    /// Lazily read matching entries in file (append) order.
    pub fn read(&self, filter: AuditFilter) -> Result<AuditReader, AuditError> {
        let file = match File::open(&self.path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(self.io_error()(e)),
        };
        Ok(AuditReader {
            path: self.path.clone(),
            reader: file,
            filter,
            line_no: 0,
            buf: Vec::new(),
        })
    }

    /// Matching entries, most recent append first.
    pub fn read_newest_first(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.read(filter)?.collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }
}

fn ends_without_newline(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Iterator over the entries of an [`AuditLog`].
///
/// Lines that are torn, not UTF-8, or fail their checksum are skipped with a
/// warning; a line with a valid checksum that does not decode is yielded as
/// an error.
/// An I/O error ends the iteration.
#[derive(Debug)]
pub struct AuditReader {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    filter: AuditFilter,
    line_no: usize,
    buf: Vec<u8>,
}

impl Iterator for AuditReader {
    type Item = Result<AuditEntry, AuditError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(source) => {
                    self.reader = None;
                    return Some(Err(AuditError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
            self.line_no += 1;

            let Some(bytes) = self.buf.strip_suffix(b"\n") else {
                tracing::warn!(path = %self.path.display(), line = self.line_no, "skipping torn audit line");
                continue;
            };
            // A crash can cut a multibyte character; once sealed it sits mid-file.
            let Ok(body) = std::str::from_utf8(bytes) else {
                tracing::warn!(path = %self.path.display(), line = self.line_no, "skipping audit line that is not UTF-8");
                continue;
            };
            if body.trim().is_empty() {
                continue;
            }
            let Some(json) = verified_payload(body) else {
                tracing::warn!(path = %self.path.display(), line = self.line_no, "skipping audit line with bad checksum");
                continue;
            };

            match serde_json::from_str::<AuditEntry>(json) {
                Ok(entry) if self.filter.matches(&entry) => return Some(Ok(entry)),
                Ok(_) => continue,
                Err(source) => {
                    return Some(Err(AuditError::Decode {
                        path: self.path.clone(),
                        line: self.line_no,
                        source,
                    }))
                }
            }
        }
    }
}

fn verified_payload(line: &str) -> Option<&str> {
    let (checksum, json) = line.split_once(' ')?;
    let expected = u64::from_str_radix(checksum, 16).ok()?;
    (xxh3_64(json.as_bytes()) == expected).then_some(json)
}
