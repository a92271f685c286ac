// error.rs — Error types for loading and applying configuration.

use std::path::PathBuf;

use keel_events::PatternError;
use keel_log::WriteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file does not exist.
    #[error("config file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Parsed, but a value makes no sense.
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// The config change event could not be written.
    #[error("failed to record config change: {0}")]
    Emit(#[from] WriteError),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::Missing { path }
        } else {
            ConfigError::Io { path, source }
        }
    }
}
