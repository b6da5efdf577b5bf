use std::path::PathBuf;

use thiserror::Error;

/// §7's "CLI failure" error kind, plus the process-spawn failures that
/// precede it.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("openspec executable not found at {path}")]
    NotFound { path: PathBuf },

    #[error("io error running openspec {subcommand}: {source}")]
    Io {
        subcommand: String,
        #[source]
        source: std::io::Error,
    },

    #[error("openspec {subcommand} failed (exit {exit_code})")]
    NonZeroExit {
        subcommand: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("openspec {subcommand} returned empty output")]
    EmptyOutput { subcommand: String },

    #[error("openspec {subcommand} returned invalid JSON")]
    InvalidJson {
        subcommand: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("openspec {subcommand} returned unexpected JSON")]
    UnexpectedJson {
        subcommand: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CliError {
    /// The message the kernel should surface verbatim to subscribers, per
    /// §7 ("stderr, or the exit code if empty").
    pub fn user_message(&self) -> String {
        match self {
            CliError::NonZeroExit {
                subcommand,
                exit_code,
                stderr,
            } => {
                if stderr.is_empty() {
                    format!("openspec {subcommand} failed (exit {exit_code})")
                } else {
                    stderr.clone()
                }
            }
            other => other.to_string(),
        }
    }
}
