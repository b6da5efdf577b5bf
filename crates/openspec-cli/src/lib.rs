//! C6: the `openspec` CLI capability. A thin, JSON-emitting subprocess
//! runner exposed to the kernel as a trait object, grounded on
//! `server/src/routes/settings.rs`'s `tokio::process::Command::new("gh")`
//! call (spawn, inspect `status.success()`, decode stdout, map a missing
//! binary to a distinct error).
//!
//! The `openspec` CLI's subcommand shapes beyond
//! `status|instructions|schemas|templates|schema which` are an explicit
//! non-goal (§1); this crate exposes exactly those six operations.

mod error;
mod types;

pub use error::CliError;
pub use types::*;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// The CLI capability consumed by the kernel (§6). Implementations are not
/// required to be `Send`+`Sync` simultaneously usable from multiple threads
/// — the kernel invokes this from its single cooperative thread — but
/// `ProcessCli` happens to be both, since it holds no interior mutability.
#[async_trait(?Send)]
pub trait CliCapability {
    async fn schemas(&self) -> Result<Vec<SchemaInfo>, CliError>;
    async fn schema_which(&self, name: &str) -> Result<SchemaResolution, CliError>;
    async fn templates(&self, schema: Option<&str>) -> Result<TemplatesMap, CliError>;
    async fn status(
        &self,
        change_id: &str,
        schema: Option<&str>,
    ) -> Result<ChangeStatusRaw, CliError>;
    async fn instructions(
        &self,
        change_id: &str,
        artifact: &str,
        schema: Option<&str>,
    ) -> Result<ArtifactInstructions, CliError>;
    async fn apply_instructions(
        &self,
        change_id: &str,
        schema: Option<&str>,
    ) -> Result<ApplyInstructions, CliError>;
}

/// Real implementation: shells out to the `openspec` binary found on
/// `binary`, run with `workspace_root` as the current directory.
#[derive(Debug, Clone)]
pub struct ProcessCli {
    binary: PathBuf,
    workspace_root: PathBuf,
}

impl ProcessCli {
    pub fn new(binary: PathBuf, workspace_root: PathBuf) -> Self {
        Self {
            binary,
            workspace_root,
        }
    }

    async fn run_json<T: DeserializeOwned>(
        &self,
        label: &str,
        args: &[&str],
    ) -> Result<T, CliError> {
        tracing::debug!(label, ?args, "invoking openspec cli");
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .current_dir(&self.workspace_root)
            .output()
            .await
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    CliError::NotFound {
                        path: self.binary.clone(),
                    }
                } else {
                    CliError::Io {
                        subcommand: label.to_string(),
                        source,
                    }
                }
            })?;

        if !output.status.success() {
            return Err(CliError::NonZeroExit {
                subcommand: label.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if output.stdout.is_empty() {
            return Err(CliError::EmptyOutput {
                subcommand: label.to_string(),
            });
        }

        // two stages, matching §7's distinct "invalid JSON" / "unexpected JSON"
        // prefixes: malformed bytes are InvalidJson, well-formed JSON that
        // doesn't match the shape this call expects is UnexpectedJson.
        let value: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|source| CliError::InvalidJson {
                subcommand: label.to_string(),
                source,
            })?;

        serde_json::from_value(value).map_err(|source| CliError::UnexpectedJson {
            subcommand: label.to_string(),
            source,
        })
    }
}

#[async_trait(?Send)]
impl CliCapability for ProcessCli {
    async fn schemas(&self) -> Result<Vec<SchemaInfo>, CliError> {
        self.run_json("schemas", &["schemas", "--json"]).await
    }

    async fn schema_which(&self, name: &str) -> Result<SchemaResolution, CliError> {
        self.run_json("schema which", &["schema", "which", name, "--json"])
            .await
    }

    async fn templates(&self, schema: Option<&str>) -> Result<TemplatesMap, CliError> {
        let mut args = vec!["templates", "--json"];
        if let Some(schema) = schema {
            args.push("--schema");
            args.push(schema);
        }
        self.run_json("templates", &args).await
    }

    async fn status(
        &self,
        change_id: &str,
        schema: Option<&str>,
    ) -> Result<ChangeStatusRaw, CliError> {
        let mut args = vec!["status", "--json", "--change", change_id];
        if let Some(schema) = schema {
            args.push("--schema");
            args.push(schema);
        }
        self.run_json("status", &args).await
    }

    async fn instructions(
        &self,
        change_id: &str,
        artifact: &str,
        schema: Option<&str>,
    ) -> Result<ArtifactInstructions, CliError> {
        let mut args = vec!["instructions", artifact, "--json", "--change", change_id];
        if let Some(schema) = schema {
            args.push("--schema");
            args.push(schema);
        }
        self.run_json("instructions", &args).await
    }

    async fn apply_instructions(
        &self,
        change_id: &str,
        schema: Option<&str>,
    ) -> Result<ApplyInstructions, CliError> {
        let mut args = vec!["instructions", "apply", "--json", "--change", change_id];
        if let Some(schema) = schema {
            args.push("--schema");
            args.push(schema);
        }
        self.run_json("instructions apply", &args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_surfaces_not_found() {
        let cli = ProcessCli::new(
            PathBuf::from("/definitely/not/a/real/openspec/binary"),
            std::env::temp_dir(),
        );
        let err = cli.schemas().await.unwrap_err();
        assert!(matches!(err, CliError::NotFound { .. }));
    }

    #[test]
    fn user_message_prefers_stderr_over_generic_text() {
        let err = CliError::NonZeroExit {
            subcommand: "status".into(),
            exit_code: 2,
            stderr: "config missing".into(),
        };
        assert_eq!(err.user_message(), "config missing");

        let err = CliError::NonZeroExit {
            subcommand: "status".into(),
            exit_code: 2,
            stderr: String::new(),
        };
        assert_eq!(err.user_message(), "openspec status failed (exit 2)");
    }

    #[test]
    fn unexpected_json_is_distinct_from_invalid_json() {
        let source = serde_json::from_value::<String>(serde_json::json!(42)).unwrap_err();
        let err = CliError::UnexpectedJson {
            subcommand: "schemas".into(),
            source,
        };
        assert_eq!(err.to_string(), "openspec schemas returned unexpected JSON");
    }
}
