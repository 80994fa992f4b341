use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_TTL_MINUTES: u64 = 60;

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub locks: LockSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub directories: Directories,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LockSettings {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_TTL_MINUTES,
        }
    }
}

/// How audit appends serialize through the audit lease.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AuditSettings {
    #[serde(default = "default_audit_file")]
    pub file_name: String,
    /// Lease acquisition attempts before an append reports `Busy`.
    #[serde(default = "default_append_attempts")]
    pub append_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Lease length; bounds how long a crashed appender can block others.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            file_name: default_audit_file(),
            append_attempts: default_append_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            lease_seconds: default_lease_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Directories {
    #[serde(default = "default_inbound")]
    pub inbound: PathBuf,
    #[serde(default = "default_corrected")]
    pub corrected: PathBuf,
    #[serde(default = "default_audits")]
    pub audits: PathBuf,
    #[serde(default = "default_locks")]
    pub locks: PathBuf,
    #[serde(default = "default_companions")]
    pub companions: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            inbound: default_inbound(),
            corrected: default_corrected(),
            audits: default_audits(),
            locks: default_locks(),
            companions: default_companions(),
        }
    }
}

impl Directories {
    /// All directories rooted at `base`.
    pub fn under(base: impl AsRef<Path>) -> Self {
        Self::default().resolve(base)
    }

    /// Make relative directories relative to `base`; absolute ones are kept.
    pub fn resolve(self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let join = |dir: PathBuf| {
            if dir.is_absolute() {
                dir
            } else {
                base.join(dir)
            }
        };
        Self {
            inbound: join(self.inbound),
            corrected: join(self.corrected),
            audits: join(self.audits),
            locks: join(self.locks),
            companions: join(self.companions),
        }
    }

    fn roles(&self) -> [(&'static str, &Path); 5] {
        [
            ("directories.inbound", self.inbound.as_path()),
            ("directories.corrected", self.corrected.as_path()),
            ("directories.audits", self.audits.as_path()),
            ("directories.locks", self.locks.as_path()),
            ("directories.companions", self.companions.as_path()),
        ]
    }
}

fn default_ttl_minutes() -> u64 {
    DEFAULT_TTL_MINUTES
}
fn default_audit_file() -> String {
    "audit.jsonl".to_string()
}
fn default_append_attempts() -> u32 {
    200
}
fn default_retry_delay_ms() -> u64 {
    10
}
fn default_lease_seconds() -> u64 {
    30
}
fn default_inbound() -> PathBuf {
    PathBuf::from("json_docs")
}
fn default_corrected() -> PathBuf {
    PathBuf::from("corrected")
}
fn default_audits() -> PathBuf {
    PathBuf::from("audits")
}
fn default_locks() -> PathBuf {
    PathBuf::from("locks")
}
fn default_companions() -> PathBuf {
    PathBuf::from("pdf_docs")
}

impl WorkflowConfig {
    pub fn lock_ttl(&self) -> chrono::Duration {
        let minutes = i64::try_from(self.locks.ttl_minutes)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 60_000);
        chrono::Duration::minutes(minutes)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.directories.audits.join(&self.audit.file_name)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut issues = Vec::new();

        if self.locks.ttl_minutes == 0 {
            issues.push(ConfigIssue::ZeroValue {
                field: "locks.ttl_minutes",
            });
        }
        if self.audit.append_attempts == 0 {
            issues.push(ConfigIssue::ZeroValue {
                field: "audit.append_attempts",
            });
        }
        if self.audit.lease_seconds == 0 {
            issues.push(ConfigIssue::ZeroValue {
                field: "audit.lease_seconds",
            });
        }

        let file_name = self.audit.file_name.trim();
        if file_name.is_empty() {
            issues.push(ConfigIssue::MissingField {
                field: "audit.file_name",
            });
        } else if file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            issues.push(ConfigIssue::InvalidFileName {
                field: "audit.file_name",
                value: self.audit.file_name.clone(),
            });
        }

        let roles = self.directories.roles();
        for (field, dir) in roles {
            if dir.as_os_str().is_empty() {
                issues.push(ConfigIssue::MissingField { field });
            }
        }
        for (idx, &(first, dir)) in roles.iter().enumerate() {
            if dir.as_os_str().is_empty() {
                continue;
            }
            for &(second, other) in &roles[idx + 1..] {
                if dir == other {
                    issues.push(ConfigIssue::SharedDirectory {
                        first,
                        second,
                        path: dir.to_path_buf(),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { issues })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    pub issues: Vec<ConfigIssue>,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigIssue {
    MissingField {
        field: &'static str,
    },
    ZeroValue {
        field: &'static str,
    },
    InvalidFileName {
        field: &'static str,
        value: String,
    },
    SharedDirectory {
        first: &'static str,
        second: &'static str,
        path: PathBuf,
    },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::MissingField { field } => write!(f, "'{field}' must not be empty"),
            ConfigIssue::ZeroValue { field } => write!(f, "'{field}' must be greater than zero"),
            ConfigIssue::InvalidFileName { field, value } => {
                write!(f, "'{field}' must be a plain file name, got '{value}'")
            }
            ConfigIssue::SharedDirectory {
                first,
                second,
                path,
            } => write!(
                f,
                "'{first}' and '{second}' both point at {}",
                path.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkflowConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lock_ttl(), chrono::Duration::minutes(60));
        assert_eq!(config.audit_path(), PathBuf::from("audits/audit.jsonl"));
    }

    #[test]
    fn test_validate_collects_every_issue() {
        let mut config = WorkflowConfig::default();
        config.locks.ttl_minutes = 0;
        config.audit.append_attempts = 0;
        config.audit.file_name = "../audit.jsonl".to_string();
        config.directories.locks = PathBuf::from("corrected");

        let err = config.validate().unwrap_err();
        assert_eq!(err.issues.len(), 4);
        assert!(err.issues.contains(&ConfigIssue::SharedDirectory {
            first: "directories.corrected",
            second: "directories.locks",
            path: PathBuf::from("corrected"),
        }));
        assert!(err.to_string().contains("locks.ttl_minutes"));
    }

    #[test]
    fn test_resolve_keeps_absolute_directories() {
        let dirs = Directories {
            locks: PathBuf::from("/var/lib/docqa/locks"),
            ..Directories::default()
        }
        .resolve("/srv/review");

        assert_eq!(dirs.inbound, PathBuf::from("/srv/review/json_docs"));
        assert_eq!(dirs.locks, PathBuf::from("/var/lib/docqa/locks"));
    }
}
