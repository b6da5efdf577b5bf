//! Route-test fixtures: a real `Router<AppState>` backed by a real kernel
//! actor thread, but wired to an in-memory `FakeCli` instead of a real
//! `openspec` binary, the same substitution `kernel::Kernel`'s own tests
//! make.

use std::collections::HashMap;

use async_trait::async_trait;
use openspec_cli::{
    ApplyInstructions, ArtifactInstructions, CliCapability, CliError, ChangeStatusRaw, SchemaInfo,
    SchemaResolution, SchemaSource, TemplatesMap,
};
use tempfile::TempDir;

use crate::{kernel_actor::KernelHandle, state::AppState};

pub(crate) struct FakeCli {
    pub schemas: Vec<SchemaInfo>,
    pub statuses: HashMap<String, ChangeStatusRaw>,
}

impl Default for FakeCli {
    fn default() -> Self {
        Self {
            schemas: vec![SchemaInfo {
                name: "default".to_string(),
                version: None,
                description: None,
            }],
            statuses: HashMap::new(),
        }
    }
}

#[async_trait(?Send)]
impl CliCapability for FakeCli {
    async fn schemas(&self) -> Result<Vec<SchemaInfo>, CliError> {
        Ok(self.schemas.clone())
    }

    async fn schema_which(&self, name: &str) -> Result<SchemaResolution, CliError> {
        Ok(SchemaResolution {
            path: format!("/nonexistent/{name}"),
            source: SchemaSource::Project,
        })
    }

    async fn templates(&self, _schema: Option<&str>) -> Result<TemplatesMap, CliError> {
        Ok(TemplatesMap::new())
    }

    async fn status(&self, change_id: &str, _schema: Option<&str>) -> Result<ChangeStatusRaw, CliError> {
        self.statuses
            .get(change_id)
            .cloned()
            .ok_or_else(|| CliError::EmptyOutput {
                subcommand: "status".to_string(),
            })
    }

    async fn instructions(
        &self,
        _change_id: &str,
        artifact: &str,
        _schema: Option<&str>,
    ) -> Result<ArtifactInstructions, CliError> {
        Ok(ArtifactInstructions {
            artifact: artifact.to_string(),
            instruction: "do it".to_string(),
            requires: Vec::new(),
        })
    }

    async fn apply_instructions(
        &self,
        _change_id: &str,
        _schema: Option<&str>,
    ) -> Result<ApplyInstructions, CliError> {
        Ok(ApplyInstructions {
            requires: Vec::new(),
            tracks: "status.md".to_string(),
            instruction: "apply it".to_string(),
        })
    }
}

/// Builds a workspace-backed `AppState` on a real kernel actor thread, using
/// `FakeCli` in place of a real `openspec` binary. Keeps the `TempDir` alive
/// alongside the state since the kernel reads from it.
pub(crate) fn test_app_state(fake: FakeCli) -> (TempDir, AppState) {
    let dir = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("openspec/changes")).unwrap();
    std::fs::write(dir.path().join("openspec/config.yaml"), "team: demo").unwrap();

    let kernel = KernelHandle::spawn_with_cli(dir.path().to_path_buf(), 20, move |_root| {
        std::rc::Rc::new(fake) as std::rc::Rc<dyn CliCapability>
    });

    (dir, AppState { kernel })
}
