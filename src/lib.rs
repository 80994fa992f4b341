//! docqa-core: concurrency and audit core of a multi-reviewer document
//! correction workflow.
//!
//! Reviewers claim a document for exclusive editing, submit corrected
//! content that is validated against a declared schema, and commit it. Every
//! commit is recorded with before/after snapshots and a structural diff in an
//! append-only audit log.
//!
//! # Architecture
//!
//! Coordination happens only through shared storage: no lock server, no
//! database. Everything rests on two file primitives (see `atomic`):
//! whole-file replacement (tempfile + fsync + rename) and create-if-absent
//! (tempfile + fsync + no-clobber link).
//!
//! - [`schema`]: declarative schema definitions parsed into a [`SchemaModel`]
//! - [`validate`]: path-qualified, accumulating validation
//! - [`diff`]: positional, array- and object-array-aware diffs
//! - [`lock`]: fixed-TTL leases with lazy reclamation of expired ones
//! - [`audit`]: checksummed JSON lines, appends serialized by a lease
//! - [`store`]: inbound / corrected / companion directories
//! - [`workflow`]: the claim → submit → commit/abandon lifecycle
//!
//! # Example
//!
//! ```no_run
//! use docqa_core::{
//!     load_from_path, load_schema_from_path, DocumentId, Submission, SystemClock,
//!     WorkflowCoordinator,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_from_path("review/workflow.toml")?;
//! let schema = load_schema_from_path("review/invoice.schema.json")?;
//! let coordinator = WorkflowCoordinator::new(config, Arc::new(schema), Arc::new(SystemClock))?;
//!
//! let mut session = coordinator.claim(&DocumentId::new("invoice_7")?, "alice")?;
//! let mut candidate = session.editable_fields().clone();
//! candidate.insert("total".into(), 1250.0.into());
//!
//! match coordinator.submit(&mut session, candidate)? {
//!     Submission::Valid(diff) => {
//!         println!("{} change(s)", diff.len());
//!         coordinator.commit(&mut session)?;
//!     }
//!     Submission::Invalid(errors) => {
//!         for error in errors {
//!             eprintln!("{error}");
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod atomic;
pub mod audit;
pub mod clock;
pub mod config;
pub mod diff;
pub mod document;
pub mod lock;
pub mod schema;
pub mod store;
pub mod validate;
pub mod value;
pub mod workflow;

// Re-exports
pub use audit::{
    export_entries, AuditEntry, AuditError, AuditFilter, AuditLog, AuditReader, ExportFormat,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_from_path, load_from_str, ConfigError, WorkflowConfig};
pub use diff::{diff, equivalent, ApplyError, Change, ChangeSummary, Diff};
pub use document::{Document, DocumentId, DocumentIdError, Fields};
pub use lock::{Lock, LockError, LockManager};
pub use schema::{
    load_schema_from_path, parse, FieldKind, FieldSpec, ScalarKind, SchemaError,
    SchemaErrorKind, SchemaLoadError, SchemaModel,
};
pub use store::{DocumentStore, InboundDocument, StoreError};
pub use validate::{apply_defaults, validate, validate_fields, ValidationError};
pub use workflow::{
    Availability, ClaimableDocument, CommitError, Committed, Session, SessionState, Submission,
    WorkflowCoordinator, WorkflowError,
};
