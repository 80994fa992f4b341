//! Time-bounded exclusive leases on shared storage.
//!
//! Each claimed document has one lock record, `<locks>/<id>.lock`, holding
//! the holder and the lease window. Mutual exclusion rests on a single
//! indivisible operation: creating that record only if it is absent.
//!
//! There is no renewal. A holder that disappears simply stops releasing, and
//! the next claim after `expires_at` treats the record as absent (lazy
//! reclamation).
//!
//! Records are only ever deleted (by release or reclamation) while holding a
//! short-lived guard file, `<locks>/.<id>.guard`, and only after re-reading
//! the record under the guard. A deleter therefore never removes a record it
//! has not just inspected, and a fresh lease created in between is left
//! alone. A guard left behind by a crashed process is cleared once it is
//! older than [`GUARD_STALE_AFTER`].

use crate::atomic;
use crate::clock::Clock;
use crate::document::DocumentId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const LOCK_EXTENSION: &str = "lock";

/// Create-or-reclaim rounds before a claim gives up under contention.
const MAX_ROUNDS: usize = 50;

/// Pause between rounds while another process holds the guard.
const GUARD_BACKOFF: StdDuration = StdDuration::from_millis(2);

/// Wall-clock age after which a guard is considered abandoned.
pub const GUARD_STALE_AFTER: StdDuration = StdDuration::from_secs(10);

static GUARD_SEQ: AtomicU64 = AtomicU64::new(0);

/// A lease on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub document_id: DocumentId,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    /// Live means `now < expires_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Same holder and same acquisition: the identity of one lease.
    pub fn same_lease(&self, other: &Lock) -> bool {
        self.document_id == other.document_id
            && self.holder_id == other.holder_id
            && self.acquired_at == other.acquired_at
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("document '{document_id}' is locked by '{holder_id}' until {expires_at}")]
    AlreadyLocked {
        document_id: DocumentId,
        holder_id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("'{holder_id}' no longer holds the lock on '{document_id}'")]
    NotHolder {
        document_id: DocumentId,
        holder_id: String,
        /// Holder currently on record, if any.
        current_holder: Option<String>,
    },

    #[error("lock on '{document_id}' expired at {expired_at}")]
    Expired {
        document_id: DocumentId,
        expired_at: DateTime<Utc>,
    },

    #[error("lock on '{document_id}' is contended; gave up after {rounds} rounds")]
    Contended { document_id: DocumentId, rounds: usize },

    #[error("lock TTL must be positive, got {0}")]
    InvalidTtl(Duration),

    #[error("holder id must not be empty")]
    EmptyHolder,

    #[error("lock storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode lock record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A lock record as found on disk. `lock` is `None` when the bytes do not
/// decode (treated as stale).
struct Observed {
    bytes: Vec<u8>,
    lock: Option<Lock>,
}

/// Exclusive right to delete one document's record. Removed on drop, unless
/// it was cleared as abandoned and someone else's guard now sits there.
struct Guard {
    path: PathBuf,
    token: Vec<u8>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        match remove_guard_if(&self.path, &self.token) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(path = %self.path.display(), "lock guard was cleared while held");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock guard");
            }
        }
    }
}

/// Unique per guard acquisition, across threads and processes.
fn guard_token() -> Vec<u8> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{}-{nanos}",
        std::process::id(),
        GUARD_SEQ.fetch_add(1, Ordering::Relaxed)
    )
    .into_bytes()
}

/// Remove the guard at `path` only if it still carries `token`.
fn remove_guard_if(path: &Path, token: &[u8]) -> io::Result<bool> {
    match fs::read(path) {
        Ok(current) if current == token => match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        },
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Grants and revokes leases stored in one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    /// Manage lock records in `dir`, which must already exist.
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, document_id: &DocumentId) -> PathBuf {
        self.dir
            .join(format!("{}.{LOCK_EXTENSION}", document_id.as_str()))
    }

    fn guard_path(&self, document_id: &DocumentId) -> PathBuf {
        self.dir.join(format!(".{}.guard", document_id.as_str()))
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LockError + '_ {
        move |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Claim `document_id` for `holder_id` for `ttl`.
    ///
    /// Fails immediately with [`LockError::AlreadyLocked`] while another live
    /// lease exists; an expired lease is reclaimed on the way.
    pub fn claim(
        &self,
        document_id: &DocumentId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<Lock, LockError> {
        if ttl <= Duration::zero() {
            return Err(LockError::InvalidTtl(ttl));
        }
        if holder_id.trim().is_empty() {
            return Err(LockError::EmptyHolder);
        }

        let now = self.clock.now();
        let lock = Lock {
            document_id: document_id.clone(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        let bytes = serde_json::to_vec_pretty(&lock)?;
        let path = self.record_path(document_id);

        for _ in 0..MAX_ROUNDS {
            if atomic::create_exclusive(&path, &bytes).map_err(Self::io_error(&path))? {
                tracing::info!(
                    document = %document_id,
                    holder = holder_id,
                    expires_at = %lock.expires_at,
                    "lock claimed"
                );
                return Ok(lock);
            }

            let Some(observed) = self.observe(&path)? else {
                // Released between our create attempt and the read.
                continue;
            };
            match &observed.lock {
                Some(existing) if existing.is_live(now) => {
                    return Err(LockError::AlreadyLocked {
                        document_id: document_id.clone(),
                        holder_id: existing.holder_id.clone(),
                        expires_at: existing.expires_at,
                    });
                }
                Some(existing) => {
                    tracing::debug!(
                        document = %document_id,
                        stale_holder = %existing.holder_id,
                        expired_at = %existing.expires_at,
                        "reclaiming expired lock"
                    );
                }
                None => {
                    tracing::warn!(document = %document_id, "reclaiming unreadable lock record");
                }
            }

            match self.try_guard(document_id)? {
                Some(_guard) => {
                    self.remove_if_unchanged(&path, &observed.bytes)?;
                }
                None => std::thread::sleep(GUARD_BACKOFF),
            }
        }

        Err(LockError::Contended {
            document_id: document_id.clone(),
            rounds: MAX_ROUNDS,
        })
    }

    /// Remove the record if `lock` is still the lease on record.
    pub fn release(&self, lock: &Lock) -> Result<(), LockError> {
        let _guard = self.guard(&lock.document_id)?;
        let path = self.record_path(&lock.document_id);
        let observed = self.observe(&path)?;

        match observed {
            Some(Observed {
                bytes,
                lock: Some(current),
            }) if current.same_lease(lock) => {
                self.remove_if_unchanged(&path, &bytes)?;
                tracing::info!(
                    document = %lock.document_id,
                    holder = %lock.holder_id,
                    "lock released"
                );
                Ok(())
            }
            other => Err(self.not_holder(lock, other.and_then(|o| o.lock).as_ref())),
        }
    }

    /// Check that `lock` is still the live lease on record.
    pub fn verify(&self, lock: &Lock) -> Result<(), LockError> {
        let path = self.record_path(&lock.document_id);
        let current = self.observe(&path)?.and_then(|o| o.lock);
        match current {
            Some(current) if current.same_lease(lock) => {
                if current.is_live(self.clock.now()) {
                    Ok(())
                } else {
                    Err(LockError::Expired {
                        document_id: lock.document_id.clone(),
                        expired_at: current.expires_at,
                    })
                }
            }
            other => Err(self.not_holder(lock, other.as_ref())),
        }
    }

    /// Run `f` while `lock` is verified as the live lease and its record is
    /// pinned: nothing can release or reclaim it until `f` returns.
    ///
    /// `f` should be short; the pin is a guard that others clear after
    /// [`GUARD_STALE_AFTER`].
    pub fn with_verified<T>(&self, lock: &Lock, f: impl FnOnce() -> T) -> Result<T, LockError> {
        let _guard = self.guard(&lock.document_id)?;
        self.verify(lock)?;
        Ok(f())
    }

    /// Holder and expiry of the live lease on `document_id`, if any.
    pub fn is_held(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<(String, DateTime<Utc>)>, LockError> {
        let now = self.clock.now();
        Ok(self
            .holder_of(document_id)?
            .filter(|lock| lock.is_live(now))
            .map(|lock| (lock.holder_id, lock.expires_at)))
    }

    /// The lease on record for `document_id`, live or not.
    pub fn holder_of(&self, document_id: &DocumentId) -> Result<Option<Lock>, LockError> {
        let path = self.record_path(document_id);
        Ok(self.observe(&path)?.and_then(|o| o.lock))
    }

    /// Remove every expired or unreadable lock record. Returns how many were
    /// removed; records whose guard is busy are left for a later pass.
    pub fn reap_expired(&self) -> Result<usize, LockError> {
        let now = self.clock.now();
        let entries = fs::read_dir(&self.dir).map_err(Self::io_error(&self.dir))?;
        let mut removed = 0;

        for entry in entries {
            let path = entry.map_err(Self::io_error(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
                continue;
            }
            let Ok(document_id) = DocumentId::from_path(&path) else {
                continue;
            };

            let Some(observed) = self.observe(&path)? else {
                continue;
            };
            let stale = observed.lock.as_ref().map_or(true, |lock| !lock.is_live(now));
            if !stale {
                continue;
            }
            let Some(_guard) = self.try_guard(&document_id)? else {
                continue;
            };
            if self.remove_if_unchanged(&path, &observed.bytes)? {
                tracing::info!(document = %document_id, "removed stale lock");
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn not_holder(&self, lock: &Lock, current: Option<&Lock>) -> LockError {
        LockError::NotHolder {
            document_id: lock.document_id.clone(),
            holder_id: lock.holder_id.clone(),
            current_holder: current.map(|c| c.holder_id.clone()),
        }
    }

    fn observe(&self, path: &Path) -> Result<Option<Observed>, LockError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(path)(e)),
        };
        let lock = serde_json::from_slice::<Lock>(&bytes).ok();
        Ok(Some(Observed { bytes, lock }))
    }

    /// Take the guard for `document_id`, waiting a bounded number of rounds.
    fn guard(&self, document_id: &DocumentId) -> Result<Guard, LockError> {
        for _ in 0..MAX_ROUNDS {
            if let Some(guard) = self.try_guard(document_id)? {
                return Ok(guard);
            }
            std::thread::sleep(GUARD_BACKOFF);
        }
        Err(LockError::Contended {
            document_id: document_id.clone(),
            rounds: MAX_ROUNDS,
        })
    }

    fn try_guard(&self, document_id: &DocumentId) -> Result<Option<Guard>, LockError> {
        let path = self.guard_path(document_id);
        let token = guard_token();
        if atomic::create_exclusive(&path, &token).map_err(Self::io_error(&path))? {
            return Ok(Some(Guard { path, token }));
        }

        // Token before age: a guard replaced in between reads as fresh.
        let seen = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };
        let abandoned = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > GUARD_STALE_AFTER);
        if abandoned {
            tracing::warn!(document = %document_id, "clearing abandoned lock guard");
            remove_guard_if(&path, &seen).map_err(Self::io_error(&path))?;
        }
        Ok(None)
    }

    /// Delete the record at `path` if it still holds `expected`. Caller must
    /// hold the record's guard.
    fn remove_if_unchanged(&self, path: &Path, expected: &[u8]) -> Result<bool, LockError> {
        match self.observe(path)? {
            Some(current) if current.bytes == expected => match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(Self::io_error(path)(e)),
            },
            _ => Ok(false),
        }
    }
}
