pub mod loader;
pub mod schema;

pub use loader::{load_from_path, load_from_str, ConfigError, ConfigOrigin};
pub use schema::{
    AuditSettings, ConfigIssue, ConfigValidationError, Directories, LockSettings, WorkflowConfig,
    DEFAULT_TTL_MINUTES,
};
