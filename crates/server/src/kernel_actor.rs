//! Bridges the kernel's single-threaded, `Rc`-based world onto the server's
//! ordinary multithreaded tokio runtime, grounded on
//! `services/src/services/events.rs`'s `EventService::spawn_event_worker` /
//! `EventWorkerHandle` (dedicated task, `mpsc` command channel, `oneshot`
//! per-call reply) combined with `WatcherManager::subscribe`'s
//! dedicated-OS-thread-running-a-`!Send`-loop shape (`std::thread::spawn` +
//! a single-threaded runtime driving a `LocalSet`), since unlike the event
//! worker, the kernel itself can never be moved onto the async runtime's
//! worker pool.

use std::{path::PathBuf, rc::Rc};

use kernel::{Kernel, KernelError, StateValue, SubscriptionHandle};
use openspec_cli::ProcessCli;
use reactive::DepRegistry;
use reactive_fs::ReactiveFs;
use tokio::sync::{mpsc, oneshot, watch};

/// One entry per NamedState in §4.6's catalogue. The HTTP/WS layer builds
/// one of these from a route's path/query params; the actor thread maps it
/// onto the matching `Kernel::ensure_*` call and key.
#[derive(Debug, Clone)]
pub enum NamedState {
    Schemas,
    ChangeIds,
    ProjectConfig,
    StatusList,
    SchemaResolution { name: String },
    SchemaYaml { name: String },
    SchemaDetail { name: String },
    SchemaFiles { name: String },
    Templates { schema: Option<String> },
    TemplateContents { schema: Option<String> },
    ChangeStatus { id: String, schema: Option<String> },
    ArtifactInstructions { id: String, artifact: String, schema: Option<String> },
    ApplyInstructions { id: String, schema: Option<String> },
    ChangeMetadata { id: String },
    ArtifactOutput { id: String, output_path: String },
    GlobArtifactFiles { id: String, output_path: String },
}

impl NamedState {
    fn key(&self) -> String {
        use kernel::state_keys as keys;
        match self {
            NamedState::Schemas => keys::global("schemas"),
            NamedState::ChangeIds => keys::global("changeIds"),
            NamedState::ProjectConfig => keys::global("projectConfig"),
            NamedState::StatusList => keys::global("statusList"),
            NamedState::SchemaResolution { name } => keys::schema(name, "resolution"),
            NamedState::SchemaYaml { name } => keys::schema(name, "yaml"),
            NamedState::SchemaDetail { name } => keys::schema(name, "detail"),
            NamedState::SchemaFiles { name } => keys::schema(name, "files"),
            NamedState::Templates { schema } => keys::schema(schema.as_deref().unwrap_or(""), "templates"),
            NamedState::TemplateContents { schema } => {
                keys::schema(schema.as_deref().unwrap_or(""), "templateContents")
            }
            NamedState::ChangeStatus { id, schema } => keys::change(id, "status", schema.as_deref()),
            NamedState::ArtifactInstructions { id, artifact, .. } => {
                keys::change_artifact(id, "instructions", artifact)
            }
            NamedState::ApplyInstructions { id, schema } => {
                keys::change(id, "applyInstructions", schema.as_deref())
            }
            NamedState::ChangeMetadata { id } => keys::change(id, "metadata", None),
            NamedState::ArtifactOutput { id, output_path } => {
                keys::change_artifact(id, "artifactOutput", output_path)
            }
            NamedState::GlobArtifactFiles { id, output_path } => {
                keys::change_artifact(id, "globArtifactFiles", output_path)
            }
        }
    }
}

enum Command {
    Warmup(oneshot::Sender<Result<(), KernelError>>),
    Ensure(NamedState, oneshot::Sender<Result<StateValue, KernelError>>),
    Get(NamedState, oneshot::Sender<Result<StateValue, KernelError>>),
    Peek(NamedState, oneshot::Sender<Option<StateValue>>),
    Subscribe(
        NamedState,
        oneshot::Sender<Option<(SubscriptionHandle, watch::Receiver<Option<StateValue>>)>>,
    ),
    Shutdown,
}

/// `Send`/`Clone` front for the kernel, the only part of it visible to
/// axum route handlers.
#[derive(Clone)]
pub struct KernelHandle {
    tx: mpsc::Sender<Command>,
}

impl KernelHandle {
    /// Spawns a dedicated OS thread running a single-threaded tokio runtime
    /// and a `LocalSet`, builds the kernel on it, and returns a handle that
    /// can be freely cloned and moved across the server's worker threads.
    pub fn spawn(workspace_root: PathBuf, openspec_bin: PathBuf, debounce_ms: u64) -> Self {
        Self::spawn_with_cli(workspace_root, debounce_ms, move |root| {
            Rc::new(ProcessCli::new(openspec_bin, root.to_path_buf())) as Rc<dyn openspec_cli::CliCapability>
        })
    }

    /// Same as `spawn`, but with the CLI capability built by the caller
    /// instead of always shelling out via `ProcessCli` — lets route tests
    /// exercise the full actor/handle/kernel chain against an in-memory
    /// fake, the same way `kernel::Kernel`'s own tests use a `FakeCli`
    /// instead of a real `openspec` binary on PATH.
    pub(crate) fn spawn_with_cli(
        workspace_root: PathBuf,
        debounce_ms: u64,
        build_cli: impl FnOnce(&std::path::Path) -> Rc<dyn openspec_cli::CliCapability> + Send + 'static,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(256);

        std::thread::Builder::new()
            .name("openspec-kernel".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build kernel runtime");
                let local = tokio::task::LocalSet::new();

                local.block_on(&runtime, async move {
                    let registry = DepRegistry::new();
                    let fs = Rc::new(ReactiveFs::new(
                        registry.clone(),
                        std::time::Duration::from_millis(debounce_ms),
                    ));
                    let cli = build_cli(&workspace_root);
                    let kernel = Kernel::new(fs, cli, workspace_root, registry);

                    while let Some(command) = rx.recv().await {
                        match command {
                            Command::Warmup(respond) => {
                                let kernel = kernel.clone();
                                tokio::task::spawn_local(async move {
                                    let _ = respond.send(kernel.warmup().await);
                                });
                            }
                            Command::Ensure(state, respond) => {
                                let kernel = kernel.clone();
                                tokio::task::spawn_local(async move {
                                    let result = ensure(&kernel, state).await;
                                    let _ = respond.send(result);
                                });
                            }
                            Command::Get(state, respond) => {
                                let result = kernel.get(&state.key());
                                let _ = respond.send(result);
                            }
                            Command::Peek(state, respond) => {
                                let result = kernel.peek(&state.key());
                                let _ = respond.send(result);
                            }
                            Command::Subscribe(state, respond) => {
                                let result = kernel.subscribe(&state.key());
                                let _ = respond.send(result);
                            }
                            Command::Shutdown => {
                                kernel.shutdown();
                                break;
                            }
                        }
                    }
                });
            })
            .expect("failed to spawn kernel thread");

        Self { tx }
    }

    pub async fn warmup(&self) -> Result<(), KernelError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Warmup(tx))
            .await
            .map_err(|_| KernelError::Cli("kernel thread is gone".to_string()))?;
        rx.await
            .map_err(|_| KernelError::Cli("kernel thread dropped the response".to_string()))?
    }

    pub async fn ensure(&self, state: NamedState) -> Result<StateValue, KernelError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Ensure(state, tx))
            .await
            .map_err(|_| KernelError::Cli("kernel thread is gone".to_string()))?;
        rx.await
            .map_err(|_| KernelError::Cli("kernel thread dropped the response".to_string()))?
    }

    pub async fn get(&self, state: NamedState) -> Result<StateValue, KernelError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Get(state, tx))
            .await
            .map_err(|_| KernelError::Cli("kernel thread is gone".to_string()))?;
        rx.await
            .map_err(|_| KernelError::Cli("kernel thread dropped the response".to_string()))?
    }

    pub async fn peek(&self, state: NamedState) -> Option<StateValue> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Peek(state, tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn subscribe(
        &self,
        state: NamedState,
    ) -> Option<(SubscriptionHandle, watch::Receiver<Option<StateValue>>)> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Subscribe(state, tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

async fn ensure(kernel: &Rc<Kernel>, state: NamedState) -> Result<StateValue, KernelError> {
    Ok(match state {
        NamedState::Schemas => StateValue::Schemas(kernel.ensure_schemas().await?),
        NamedState::ChangeIds => StateValue::ChangeIds(kernel.ensure_change_ids().await?),
        NamedState::ProjectConfig => StateValue::ProjectConfig(kernel.ensure_project_config().await?),
        NamedState::StatusList => StateValue::StatusList(kernel.ensure_status_list().await?),
        NamedState::SchemaResolution { name } => {
            StateValue::SchemaResolution(kernel.ensure_schema_resolution(&name).await?)
        }
        NamedState::SchemaYaml { name } => StateValue::SchemaYaml(kernel.ensure_schema_yaml(&name).await?),
        NamedState::SchemaDetail { name } => {
            StateValue::SchemaDetail(kernel.ensure_schema_detail(&name).await?)
        }
        NamedState::SchemaFiles { name } => StateValue::SchemaFiles(kernel.ensure_schema_files(&name).await?),
        NamedState::Templates { schema } => {
            StateValue::Templates(kernel.ensure_templates(schema.as_deref()).await?)
        }
        NamedState::TemplateContents { schema } => {
            StateValue::TemplateContents(kernel.ensure_template_contents(schema.as_deref()).await?)
        }
        NamedState::ChangeStatus { id, schema } => {
            StateValue::ChangeStatus(kernel.ensure_change_status(&id, schema.as_deref()).await?)
        }
        NamedState::ArtifactInstructions { id, artifact, schema } => StateValue::ArtifactInstructions(
            kernel
                .ensure_instructions(&id, &artifact, schema.as_deref())
                .await?,
        ),
        NamedState::ApplyInstructions { id, schema } => StateValue::ApplyInstructions(
            kernel.ensure_apply_instructions(&id, schema.as_deref()).await?,
        ),
        NamedState::ChangeMetadata { id } => {
            StateValue::ChangeMetadata(kernel.ensure_change_metadata(&id).await?)
        }
        NamedState::ArtifactOutput { id, output_path } => {
            StateValue::ArtifactOutput(kernel.ensure_artifact_output(&id, &output_path).await?)
        }
        NamedState::GlobArtifactFiles { id, output_path } => {
            StateValue::GlobArtifactFiles(kernel.ensure_glob_artifact_files(&id, &output_path).await?)
        }
    })
}
