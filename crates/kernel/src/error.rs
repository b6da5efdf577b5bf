use std::path::PathBuf;

use openspec_cli::CliError;
use thiserror::Error;

/// §7's error taxonomy. Every variant carries the discriminating message
/// prefix the spec mandates, produced via `#[error(...)]` rather than
/// assembled by hand at call sites.
#[derive(Debug, Error, Clone)]
pub enum KernelError {
    #[error("{0}")]
    Cli(String),

    #[error("schema '{name}' failed validation: {reason}")]
    SchemaValidation { name: String, reason: String },

    #[error("Invalid path: outside schema root")]
    PathSafety,

    #[error("state '{key}' was never ensured")]
    MissingKey { key: String },

    #[error("directory walk failed under {path}: {source}")]
    Walk {
        path: PathBuf,
        source: std::sync::Arc<std::io::Error>,
    },
}

impl From<CliError> for KernelError {
    fn from(err: CliError) -> Self {
        KernelError::Cli(err.user_message())
    }
}

impl KernelError {
    pub fn walk(path: PathBuf, source: std::io::Error) -> Self {
        KernelError::Walk {
            path,
            source: std::sync::Arc::new(source),
        }
    }
}
