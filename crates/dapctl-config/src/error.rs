use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration, adapter or task name that is not defined.
    #[error("no {kind} named '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("cannot write default config {}: {source}", path.display())]
    CreateDefault {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `origin` is the file path, or `<string>` for in-memory input.
    #[error("invalid TOML in {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("invalid setting {field}: {message}")]
    Validation {
        /// Dotted path such as `adapters.lldb.port`.
        field: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConfigError {
    pub(crate) fn parse(origin: impl Into<String>, message: impl ToString) -> Self {
        ConfigError::Parse {
            origin: origin.into(),
            message: message.to_string(),
        }
    }
}
