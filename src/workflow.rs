//! The claim / submit / commit / abandon lifecycle.
//!
//! A [`Session`] is the only state a caller carries between operations. It
//! is plain data (serde-serializable) and holds the lease, the snapshot taken
//! at claim time and the last candidate that passed validation.

use crate::audit::{AuditEntry, AuditError, AuditFilter, AuditLog};
use crate::clock::Clock;
use crate::config::WorkflowConfig;
use crate::diff::{diff, Diff};
use crate::document::{DocumentId, Fields};
use crate::lock::{Lock, LockError, LockManager};
use crate::schema::SchemaModel;
use crate::store::{DocumentStore, StoreError};
use crate::validate::{apply_defaults, validate_fields, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Claimed,
    Editing,
    Validated,
    Committed,
    Released,
}

impl SessionState {
    pub fn is_open(self) -> bool {
        !matches!(self, SessionState::Committed | SessionState::Released)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Claimed => "claimed",
            SessionState::Editing => "editing",
            SessionState::Validated => "validated",
            SessionState::Committed => "committed",
            SessionState::Released => "released",
        };
        f.write_str(name)
    }
}

/// One holder's edit of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    lock: Lock,
    original: Fields,
    editable: Fields,
    staged: Option<Staged>,
    state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Staged {
    candidate: Fields,
    diff: Diff,
}

impl Session {
    pub fn document_id(&self) -> &DocumentId {
        &self.lock.document_id
    }

    pub fn holder_id(&self) -> &str {
        &self.lock.holder_id
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.lock.expires_at
    }

    /// The document exactly as stored when the claim was made.
    pub fn original(&self) -> &Fields {
        &self.original
    }

    /// Starting values for an editor: the staged candidate if there is one,
    /// otherwise the original with schema defaults filled in.
    pub fn editable_fields(&self) -> &Fields {
        self.staged
            .as_ref()
            .map_or(&self.editable, |staged| &staged.candidate)
    }

    /// The last candidate that passed validation.
    pub fn candidate(&self) -> Option<&Fields> {
        self.staged.as_ref().map(|s| &s.candidate)
    }

    pub fn pending_diff(&self) -> Option<&Diff> {
        self.staged.as_ref().map(|s| &s.diff)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

/// Outcome of [`WorkflowCoordinator::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Valid(Diff),
    Invalid(Vec<ValidationError>),
}

impl Submission {
    pub fn is_valid(&self) -> bool {
        matches!(self, Submission::Valid(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub entry: AuditEntry,
    pub corrected_path: PathBuf,
    /// `false` when the final release failed; the lease then runs to expiry.
    pub lock_released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Locked {
        holder_id: String,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimableDocument {
    pub id: DocumentId,
    pub availability: Availability,
    pub companion: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("document '{0}' has already been corrected")]
    AlreadyCorrected(DocumentId),

    #[error("document '{0}' is not in the inbound store")]
    NotFound(DocumentId),

    #[error("session for '{document_id}' is {state}")]
    SessionClosed {
        document_id: DocumentId,
        state: SessionState,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("session for '{0}' has no validated candidate")]
    NotValidated(DocumentId),

    #[error("session for '{document_id}' is {state}")]
    SessionClosed {
        document_id: DocumentId,
        state: SessionState,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("corrected document was not written: {0}")]
    Store(#[from] StoreError),

    /// The corrected document is written but unaudited; the lease is kept.
    #[error("audit append failed after the corrected document was written: {0}")]
    Audit(#[from] AuditError),
}

/// Drives documents through claim, validation, commit and release.
#[derive(Debug)]
pub struct WorkflowCoordinator {
    config: WorkflowConfig,
    schema: Arc<SchemaModel>,
    store: DocumentStore,
    locks: LockManager,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl WorkflowCoordinator {
    /// The directories in `config` must already exist.
    pub fn new(
        config: WorkflowConfig,
        schema: Arc<SchemaModel>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WorkflowError> {
        let dirs = &config.directories;
        let locks = LockManager::new(&dirs.locks, clock.clone());
        let audit = AuditLog::open(&dirs.audits, config.audit.clone(), clock.clone())?;
        let store = DocumentStore::new(dirs.clone());
        Ok(Self {
            config,
            schema,
            store,
            locks,
            audit,
            clock,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Uncorrected inbound documents, oldest first, with their lock status.
    pub fn list_claimable(&self) -> Result<Vec<ClaimableDocument>, WorkflowError> {
        let mut claimable = Vec::new();
        for doc in self.store.list_inbound()? {
            if self.store.is_corrected(&doc.id) {
                continue;
            }
            let availability = match self.locks.is_held(&doc.id)? {
                Some((holder_id, expires_at)) => Availability::Locked {
                    holder_id,
                    expires_at,
                },
                None => Availability::Available,
            };
            let companion = self.store.companion_path(&doc.id);
            claimable.push(ClaimableDocument {
                id: doc.id,
                availability,
                companion,
            });
        }
        Ok(claimable)
    }

    /// Take the lease on `document_id` and snapshot its current content.
    pub fn claim(&self, document_id: &DocumentId, holder_id: &str) -> Result<Session, WorkflowError> {
        if self.store.is_corrected(document_id) {
            return Err(WorkflowError::AlreadyCorrected(document_id.clone()));
        }
        if !self.store.exists(document_id) {
            return Err(WorkflowError::NotFound(document_id.clone()));
        }

        let lock = self
            .locks
            .claim(document_id, holder_id, self.config.lock_ttl())?;

        // A commit may have landed between the check above and the claim.
        if self.store.is_corrected(document_id) {
            self.release_quietly(&lock);
            return Err(WorkflowError::AlreadyCorrected(document_id.clone()));
        }
        let document = match self.store.load_inbound(document_id) {
            Ok(document) => document,
            Err(e) => {
                self.release_quietly(&lock);
                return Err(e.into());
            }
        };

        let editable = apply_defaults(&document.fields, &self.schema);
        Ok(Session {
            lock,
            original: document.fields,
            editable,
            staged: None,
            state: SessionState::Claimed,
        })
    }

    /// Validate `candidate` and, if it passes, stage it with its diff.
    ///
    /// Touches neither the lock nor any store. An invalid candidate clears
    /// whatever was staged before.
    pub fn submit(&self, session: &mut Session, candidate: Fields) -> Result<Submission, WorkflowError> {
        if !session.state.is_open() {
            return Err(WorkflowError::SessionClosed {
                document_id: session.document_id().clone(),
                state: session.state,
            });
        }

        let errors = validate_fields(&candidate, &self.schema);
        if !errors.is_empty() {
            tracing::debug!(
                document = %session.document_id(),
                errors = errors.len(),
                "candidate rejected"
            );
            session.staged = None;
            session.state = SessionState::Editing;
            return Ok(Submission::Invalid(errors));
        }

        let changes = diff(&session.original, &candidate, &self.schema);
        session.staged = Some(Staged {
            candidate,
            diff: changes.clone(),
        });
        session.state = SessionState::Validated;
        Ok(Submission::Valid(changes))
    }

    /// Persist the staged candidate: write the corrected document, append
    /// one audit entry, then release the lease.
    ///
    /// Any failure before the release leaves the lease held until expiry.
    pub fn commit(&self, session: &mut Session) -> Result<Committed, CommitError> {
        if !session.state.is_open() {
            return Err(CommitError::SessionClosed {
                document_id: session.document_id().clone(),
                state: session.state,
            });
        }
        let Some(staged) = session.staged.as_ref() else {
            return Err(CommitError::NotValidated(session.document_id().clone()));
        };

        let id = session.document_id();
        // Pinned so an expiring lease cannot be reclaimed mid-write.
        let corrected_path = self
            .locks
            .with_verified(&session.lock, || self.store.write_corrected(id, &staged.candidate))??;

        let entry = AuditEntry::correction(
            id.clone(),
            session.lock.holder_id.clone(),
            self.clock.now(),
            session.original.clone(),
            staged.candidate.clone(),
            staged.diff.clone(),
        )
        .with_schema_title(self.schema.title.clone());
        self.audit.append(&entry)?;

        let lock_released = match self.locks.release(&session.lock) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(document = %id, error = %e, "commit persisted but lock release failed");
                false
            }
        };

        tracing::info!(
            document = %id,
            holder = %session.lock.holder_id,
            changes = entry.summary.total,
            "correction committed"
        );
        session.state = SessionState::Committed;
        Ok(Committed {
            entry,
            corrected_path,
            lock_released,
        })
    }

    /// Give the document back without committing.
    ///
    /// A lease that was already reclaimed by someone else counts as released.
    pub fn abandon(&self, session: &mut Session) -> Result<(), WorkflowError> {
        if !session.state.is_open() {
            return Err(WorkflowError::SessionClosed {
                document_id: session.document_id().clone(),
                state: session.state,
            });
        }
        match self.locks.release(&session.lock) {
            Ok(()) => {}
            Err(LockError::NotHolder { current_holder, .. }) => {
                tracing::debug!(
                    document = %session.document_id(),
                    current_holder = ?current_holder,
                    "abandoned session had already lost its lock"
                );
            }
            Err(e) => return Err(e.into()),
        }
        session.staged = None;
        session.state = SessionState::Released;
        Ok(())
    }

    /// Audit entries for one document, newest first.
    pub fn history(&self, document_id: &DocumentId) -> Result<Vec<AuditEntry>, WorkflowError> {
        Ok(self
            .audit
            .read_newest_first(AuditFilter::all().document(document_id.clone()))?)
    }

    /// Remove lock records whose lease has run out.
    pub fn reap_expired_locks(&self) -> Result<usize, WorkflowError> {
        Ok(self.locks.reap_expired()?)
    }

    fn release_quietly(&self, lock: &Lock) {
        if let Err(e) = self.locks.release(lock) {
            tracing::warn!(document = %lock.document_id, error = %e, "failed to release lock");
        }
    }
}
