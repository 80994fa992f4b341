use crate::config::schema::{ConfigValidationError, WorkflowConfig};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where config text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Inline,
    File(PathBuf),
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Inline => f.write_str("inline workflow config"),
            ConfigOrigin::File(path) => write!(f, "workflow config {}", path.display()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read workflow config from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Toml {
        origin: ConfigOrigin,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("invalid {origin}: {source}")]
    Validation {
        origin: ConfigOrigin,
        #[source]
        source: ConfigValidationError,
    },
}

fn parse(input: &str, origin: ConfigOrigin) -> Result<WorkflowConfig, ConfigError> {
    let config: WorkflowConfig = match toml_edit::de::from_str(input) {
        Ok(config) => config,
        Err(source) => return Err(ConfigError::Toml { origin, source }),
    };
    match config.validate() {
        Ok(()) => Ok(config),
        Err(source) => Err(ConfigError::Validation { origin, source }),
    }
}

/// Parse and validate a config. Directories stay as written.
pub fn load_from_str(input: &str) -> Result<WorkflowConfig, ConfigError> {
    parse(input, ConfigOrigin::Inline)
}

/// Load a config file; relative directories resolve against its parent.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<WorkflowConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse(&contents, ConfigOrigin::File(path.to_path_buf()))?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    config.directories = config.directories.resolve(base);
    tracing::debug!(path = %path.display(), "loaded workflow config");
    Ok(config)
}
