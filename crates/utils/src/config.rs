//! Typed config loader, in the spirit of the teacher's `services/config`
//! module but much smaller: this repo has no versioned on-disk config to
//! migrate, just a handful of environment-variable knobs.

use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_DEBOUNCE_MS: u64 = 50;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5700";
const DEFAULT_OPENSPEC_BIN: &str = "openspec";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENSPEC_UI_WORKSPACE_ROOT is not set and the current directory could not be read: {0}")]
    MissingWorkspaceRoot(#[source] std::io::Error),
    #[error("{var} must be a valid integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// The knobs `spec.md` §9 calls out as quality/tuning surfaces (debounce
/// window, watcher recursion) plus the paths the kernel needs to locate the
/// workspace and the `openspec` binary.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub workspace_root: PathBuf,
    pub debounce_ms: u64,
    pub watcher_recursive: bool,
    pub openspec_bin: PathBuf,
    pub bind_addr: String,
}

impl KernelConfig {
    /// Reads `OPENSPEC_UI_WORKSPACE_ROOT`, `OPENSPEC_UI_DEBOUNCE_MS`,
    /// `OPENSPEC_UI_WATCHER_RECURSIVE`, `OPENSPEC_UI_CLI_BIN` and
    /// `OPENSPEC_UI_BIND_ADDR` from the process environment, falling back
    /// to the current directory / sane defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let workspace_root = match std::env::var("OPENSPEC_UI_WORKSPACE_ROOT") {
            Ok(value) => PathBuf::from(value),
            Err(_) => std::env::current_dir().map_err(ConfigError::MissingWorkspaceRoot)?,
        };

        let debounce_ms = match std::env::var("OPENSPEC_UI_DEBOUNCE_MS") {
            Ok(value) => value
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: "OPENSPEC_UI_DEBOUNCE_MS",
                    value,
                })?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        let watcher_recursive = std::env::var("OPENSPEC_UI_WATCHER_RECURSIVE")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let openspec_bin = std::env::var("OPENSPEC_UI_CLI_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_OPENSPEC_BIN));

        let bind_addr = std::env::var("OPENSPEC_UI_BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        Ok(Self {
            workspace_root,
            debounce_ms,
            watcher_recursive,
            openspec_bin,
            bind_addr,
        })
    }
}
