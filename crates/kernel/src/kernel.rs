//! C7: warm-up, entity lifecycle, the per-key NamedState registry, and the
//! `ensureX`/`getX`/`peekX` APIs the RPC surface (§6) is built on.

use std::{cell::Cell, collections::HashSet, path::PathBuf, rc::Rc};

use openspec_cli::CliCapability;
use reactive::DepRegistry;
use reactive_fs::{ReactiveFs, ReadDirOptions};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    entity::EntityRegistry,
    error::KernelError,
    glob_match, keys, schema,
    state::{resolve_within, StateStore, StateValue},
    types::{Artifact, ChangeStatus, GlobFileMatch},
};

pub struct Kernel {
    registry: Rc<DepRegistry>,
    fs: Rc<ReactiveFs>,
    cli: Rc<dyn CliCapability>,
    workspace_root: PathBuf,
    state: StateStore,
    entities: EntityRegistry,
    root_cancel: CancellationToken,
    warmup_started: Cell<bool>,
    warmup_result: Rc<std::cell::RefCell<Option<Result<(), KernelError>>>>,
    warmup_waiters: Rc<std::cell::RefCell<Vec<oneshot::Sender<Result<(), KernelError>>>>>,
}

impl Kernel {
    pub fn new(
        fs: Rc<ReactiveFs>,
        cli: Rc<dyn CliCapability>,
        workspace_root: PathBuf,
        registry: Rc<DepRegistry>,
    ) -> Rc<Self> {
        let root_cancel = CancellationToken::new();
        Rc::new(Self {
            state: StateStore::new(registry.clone()),
            entities: EntityRegistry::new(root_cancel.clone()),
            registry,
            fs,
            cli,
            workspace_root,
            root_cancel,
            warmup_started: Cell::new(false),
            warmup_result: Rc::new(std::cell::RefCell::new(None)),
            warmup_waiters: Rc::new(std::cell::RefCell::new(Vec::new())),
        })
    }

    fn openspec_dir(&self) -> PathBuf {
        self.workspace_root.join("openspec")
    }

    fn changes_dir(&self) -> PathBuf {
        self.openspec_dir().join("changes")
    }

    fn change_dir(&self, id: &str) -> PathBuf {
        self.changes_dir().join(id)
    }

    pub fn shutdown(&self) {
        self.root_cancel.cancel();
    }

    // ---- generic ensure/get/peek plumbing -------------------------------

    /// Core of every `ensureX`: idempotently starts the effect for `key` on
    /// first call (§8: "the i-th ensureX for i > 1 creates zero new
    /// effects") and resolves once that effect has produced its first
    /// value or error.
    async fn ensure_raw<F, Fut>(
        self: &Rc<Self>,
        key: String,
        cancel: CancellationToken,
        make_task: F,
    ) -> Result<StateValue, KernelError>
    where
        F: Fn() -> Fut + 'static,
        Fut: std::future::Future<Output = Result<StateValue, KernelError>> + 'static,
    {
        let (value_slot, created) = self.state.get_or_create(&key, cancel.clone());

        if !created {
            if let Some(v) = value_slot.get() {
                return Ok(v);
            }
            // ensured but not yet ready (racing warm-up); fall through to
            // await its next change instead of spawning a second effect.
            let (tx, rx) = oneshot::channel();
            let tx = Rc::new(std::cell::RefCell::new(Some(tx)));
            let tx_clone = tx.clone();
            let sub = value_slot.on_change(move |v| {
                if let (Some(v), Some(tx)) = (v.clone(), tx_clone.borrow_mut().take()) {
                    let _ = tx.send(Ok(v));
                }
            });
            let result = rx.await.unwrap_or(Err(KernelError::MissingKey { key: key.clone() }));
            value_slot.unsubscribe(sub);
            return result;
        }

        let registry = self.registry.clone();
        let state = self.state.clone();
        let key_for_error = key.clone();
        let key_for_missing = key.clone();

        let (tx, rx) = oneshot::channel();
        let first_tx = Rc::new(std::cell::RefCell::new(Some(tx)));
        let first_tx_value = first_tx.clone();
        let first_tx_error = first_tx.clone();
        let value_slot_for_value = value_slot.clone();

        tokio::task::spawn_local(reactive::run_effect(
            registry,
            cancel,
            move || make_task(),
            move |value: StateValue| {
                value_slot_for_value.set(Some(value.clone()));
                if let Some(tx) = first_tx_value.borrow_mut().take() {
                    let _ = tx.send(Ok(value));
                }
            },
            move |err: KernelError| {
                state.set_last_error(&key_for_error, err.clone());
                if let Some(tx) = first_tx_error.borrow_mut().take() {
                    let _ = tx.send(Err(err));
                }
            },
        ));

        rx.await
            .unwrap_or(Err(KernelError::MissingKey { key: key_for_missing }))
    }

    pub fn get(&self, key: &str) -> Result<StateValue, KernelError> {
        self.state.get(key)
    }

    pub fn peek(&self, key: &str) -> Option<StateValue> {
        self.state.peek(key)
    }

    // ---- global states ---------------------------------------------------

    pub async fn ensure_schemas(self: &Rc<Self>) -> Result<Vec<openspec_cli::SchemaInfo>, KernelError> {
        let key = keys::global("schemas");
        let cli = self.cli.clone();
        let value = self
            .ensure_raw(key, self.root_cancel.clone(), move || {
                let cli = cli.clone();
                async move { Ok(StateValue::Schemas(cli.schemas().await?)) }
            })
            .await?;
        match value {
            StateValue::Schemas(v) => Ok(v),
            _ => unreachable!("global:schemas always stores StateValue::Schemas"),
        }
    }

    pub async fn ensure_change_ids(self: &Rc<Self>) -> Result<Vec<String>, KernelError> {
        let key = keys::global("changeIds");
        let fs = self.fs.clone();
        let changes_dir = self.changes_dir();
        let value = self
            .ensure_raw(key, self.root_cancel.clone(), move || {
                let fs = fs.clone();
                let changes_dir = changes_dir.clone();
                async move {
                    let opts = ReadDirOptions {
                        directories_only: true,
                        include_hidden: false,
                        exclude: vec!["archive".to_string()],
                    };
                    Ok(StateValue::ChangeIds(fs.read_dir(&changes_dir, &opts).await))
                }
            })
            .await?;
        match value {
            StateValue::ChangeIds(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_project_config(self: &Rc<Self>) -> Result<Option<String>, KernelError> {
        let key = keys::global("projectConfig");
        let fs = self.fs.clone();
        let path = self.openspec_dir().join("config.yaml");
        let value = self
            .ensure_raw(key, self.root_cancel.clone(), move || {
                let fs = fs.clone();
                let path = path.clone();
                async move {
                    let content = fs.read_file(&path).await.map(|s| s.to_string());
                    Ok(StateValue::ProjectConfig(content))
                }
            })
            .await?;
        match value {
            StateValue::ProjectConfig(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    /// Phase D: depends on every per-change `status`, re-enlisting
    /// whichever change ids are currently known via `changeIds` itself
    /// (§9: "naturally re-enlists them as dependencies").
    pub async fn ensure_status_list(self: &Rc<Self>) -> Result<Vec<ChangeStatus>, KernelError> {
        let key = keys::global("statusList");
        let this = self.clone();
        let value = self
            .ensure_raw(key, self.root_cancel.clone(), move || {
                let this = this.clone();
                async move {
                    let ids = this.ensure_change_ids().await.unwrap_or_default();
                    let mut list = Vec::new();
                    for id in ids {
                        if let Ok(status) = this.ensure_change_status(&id, None).await {
                            list.push(status);
                        }
                        // a failing change's status is skipped, not fatal (§4.6 tie-breaks)
                    }
                    Ok(StateValue::StatusList(list))
                }
            })
            .await?;
        match value {
            StateValue::StatusList(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    // ---- per-schema states -------------------------------------------------

    pub async fn ensure_schema_resolution(
        self: &Rc<Self>,
        name: &str,
    ) -> Result<openspec_cli::SchemaResolution, KernelError> {
        let key = keys::schema(name, "resolution");
        let token = self.entities.ensure(&format!("schema:{name}"));
        let cli = self.cli.clone();
        let name_owned = name.to_string();
        let value = self
            .ensure_raw(key, token, move || {
                let cli = cli.clone();
                let name = name_owned.clone();
                async move { Ok(StateValue::SchemaResolution(cli.schema_which(&name).await?)) }
            })
            .await?;
        match value {
            StateValue::SchemaResolution(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_schema_yaml(self: &Rc<Self>, name: &str) -> Result<Option<String>, KernelError> {
        let key = keys::schema(name, "yaml");
        let token = self.entities.ensure(&format!("schema:{name}"));
        let this = self.clone();
        let name_owned = name.to_string();
        let value = self
            .ensure_raw(key, token, move || {
                let this = this.clone();
                let name = name_owned.clone();
                async move {
                    let resolution = this.ensure_schema_resolution(&name).await?;
                    let path = PathBuf::from(&resolution.path).join("schema.yaml");
                    Ok(StateValue::SchemaYaml(this.fs.read_file(&path).await.map(|s| s.to_string())))
                }
            })
            .await?;
        match value {
            StateValue::SchemaYaml(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    /// Failure to parse `schema.yaml` is fatal only for `detail` (§4.6 tie
    /// break); `files`/`yaml`/`templates` keep running regardless.
    pub async fn ensure_schema_detail(
        self: &Rc<Self>,
        name: &str,
    ) -> Result<crate::types::SchemaDetail, KernelError> {
        let key = keys::schema(name, "detail");
        let token = self.entities.ensure(&format!("schema:{name}"));
        let this = self.clone();
        let name_owned = name.to_string();
        let value = self
            .ensure_raw(key, token, move || {
                let this = this.clone();
                let name = name_owned.clone();
                async move {
                    let yaml = this.ensure_schema_yaml(&name).await?.ok_or_else(|| {
                        KernelError::SchemaValidation {
                            name: name.clone(),
                            reason: "schema.yaml not found".to_string(),
                        }
                    })?;
                    Ok(StateValue::SchemaDetail(schema::parse_schema_detail(&yaml)?))
                }
            })
            .await?;
        match value {
            StateValue::SchemaDetail(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_schema_files(
        self: &Rc<Self>,
        name: &str,
    ) -> Result<Vec<crate::types::ChangeFile>, KernelError> {
        let key = keys::schema(name, "files");
        let token = self.entities.ensure(&format!("schema:{name}"));
        let this = self.clone();
        let name_owned = name.to_string();
        let value = self
            .ensure_raw(key, token, move || {
                let this = this.clone();
                let name = name_owned.clone();
                async move {
                    let resolution = this.ensure_schema_resolution(&name).await?;
                    Ok(StateValue::SchemaFiles(glob_match::walk_tree(
                        std::path::Path::new(&resolution.path),
                    )?))
                }
            })
            .await?;
        match value {
            StateValue::SchemaFiles(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_templates(
        self: &Rc<Self>,
        schema: Option<&str>,
    ) -> Result<openspec_cli::TemplatesMap, KernelError> {
        let key = keys::schema(schema.unwrap_or(""), "templates");
        let token = schema
            .map(|s| self.entities.ensure(&format!("schema:{s}")))
            .unwrap_or_else(|| self.root_cancel.clone());
        let cli = self.cli.clone();
        let schema_owned = schema.map(|s| s.to_string());
        let value = self
            .ensure_raw(key, token, move || {
                let cli = cli.clone();
                let schema_owned = schema_owned.clone();
                async move { Ok(StateValue::Templates(cli.templates(schema_owned.as_deref()).await?)) }
            })
            .await?;
        match value {
            StateValue::Templates(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_template_contents(
        self: &Rc<Self>,
        schema: Option<&str>,
    ) -> Result<crate::types::TemplateContentsMap, KernelError> {
        let key = keys::schema(schema.unwrap_or(""), "templateContents");
        let token = schema
            .map(|s| self.entities.ensure(&format!("schema:{s}")))
            .unwrap_or_else(|| self.root_cancel.clone());
        let this = self.clone();
        let schema_owned = schema.map(|s| s.to_string());
        let value = self
            .ensure_raw(key, token, move || {
                let this = this.clone();
                let schema_owned = schema_owned.clone();
                async move {
                    let templates = this.ensure_templates(schema_owned.as_deref()).await?;
                    let mut out = std::collections::HashMap::new();
                    for (artifact_id, entry) in templates {
                        let content = this.fs.read_file(std::path::Path::new(&entry.path)).await;
                        out.insert(
                            artifact_id,
                            crate::types::TemplateContent {
                                content: content.map(|s| s.to_string()).unwrap_or_default(),
                                path: entry.path,
                                source: entry.source,
                            },
                        );
                    }
                    Ok(StateValue::TemplateContents(out))
                }
            })
            .await?;
        match value {
            StateValue::TemplateContents(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    // ---- per-change states -------------------------------------------------

    pub async fn ensure_change_status(
        self: &Rc<Self>,
        id: &str,
        schema: Option<&str>,
    ) -> Result<ChangeStatus, KernelError> {
        let key = keys::change(id, "status", schema);
        let token = self.entities.ensure(&format!("change:{id}"));
        let cli = self.cli.clone();
        let id_owned = id.to_string();
        let schema_owned = schema.map(|s| s.to_string());
        let this = self.clone();
        let value = self
            .ensure_raw(key, token, move || {
                let cli = cli.clone();
                let id = id_owned.clone();
                let schema_owned = schema_owned.clone();
                let this = this.clone();
                async move {
                    let raw = cli.status(&id, schema_owned.as_deref()).await?;
                    let artifacts = raw
                        .artifacts
                        .into_iter()
                        .map(|a| Artifact {
                            relative_path: format!("openspec/changes/{id}/{}", a.output_path),
                            id: a.id,
                            output_path: a.output_path,
                            status: a.status,
                            missing_deps: a.missing_deps,
                        })
                        .collect::<Vec<_>>();
                    let status = ChangeStatus {
                        change_name: raw.change_name,
                        artifacts: artifacts.clone(),
                    };
                    this.start_artifact_fanout(&id, schema_owned.as_deref(), &artifacts);
                    Ok(StateValue::ChangeStatus(status))
                }
            })
            .await?;
        match value {
            StateValue::ChangeStatus(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    /// Once `status` yields its first value, start `instructions`,
    /// `artifactOutput`, and (for glob output paths) `globArtifactFiles`
    /// for each artifact (§4.6 Phase C). `ensure_raw`'s own
    /// create-once guard makes repeat calls (on every status rerun) safe.
    fn start_artifact_fanout(self: &Rc<Self>, id: &str, schema: Option<&str>, artifacts: &[Artifact]) {
        for artifact in artifacts {
            let this = self.clone();
            let id = id.to_string();
            let schema = schema.map(|s| s.to_string());
            let artifact_id = artifact.id.clone();
            let output_path = artifact.output_path.clone();
            tokio::task::spawn_local(async move {
                let _ = this
                    .ensure_instructions(&id, &artifact_id, schema.as_deref())
                    .await;
                let _ = this.ensure_artifact_output(&id, &output_path).await;
                if glob_match::is_glob_pattern(&output_path) {
                    let _ = this.ensure_glob_artifact_files(&id, &output_path).await;
                }
            });
        }
    }

    pub async fn ensure_instructions(
        self: &Rc<Self>,
        id: &str,
        artifact: &str,
        schema: Option<&str>,
    ) -> Result<openspec_cli::ArtifactInstructions, KernelError> {
        let key = keys::change_artifact(id, "instructions", artifact);
        let token = self.entities.ensure(&format!("change:{id}"));
        let cli = self.cli.clone();
        let id_owned = id.to_string();
        let artifact_owned = artifact.to_string();
        let schema_owned = schema.map(|s| s.to_string());
        let value = self
            .ensure_raw(key, token, move || {
                let cli = cli.clone();
                let id = id_owned.clone();
                let artifact = artifact_owned.clone();
                let schema_owned = schema_owned.clone();
                async move {
                    Ok(StateValue::ArtifactInstructions(
                        cli.instructions(&id, &artifact, schema_owned.as_deref()).await?,
                    ))
                }
            })
            .await?;
        match value {
            StateValue::ArtifactInstructions(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_apply_instructions(
        self: &Rc<Self>,
        id: &str,
        schema: Option<&str>,
    ) -> Result<openspec_cli::ApplyInstructions, KernelError> {
        let key = keys::change(id, "applyInstructions", schema);
        let token = self.entities.ensure(&format!("change:{id}"));
        let cli = self.cli.clone();
        let id_owned = id.to_string();
        let schema_owned = schema.map(|s| s.to_string());
        let value = self
            .ensure_raw(key, token, move || {
                let cli = cli.clone();
                let id = id_owned.clone();
                let schema_owned = schema_owned.clone();
                async move {
                    Ok(StateValue::ApplyInstructions(
                        cli.apply_instructions(&id, schema_owned.as_deref()).await?,
                    ))
                }
            })
            .await?;
        match value {
            StateValue::ApplyInstructions(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_change_metadata(self: &Rc<Self>, id: &str) -> Result<Option<String>, KernelError> {
        let key = keys::change(id, "metadata", None);
        let token = self.entities.ensure(&format!("change:{id}"));
        let fs = self.fs.clone();
        let path = self.change_dir(id).join(".openspec.yaml");
        let value = self
            .ensure_raw(key, token, move || {
                let fs = fs.clone();
                let path = path.clone();
                async move { Ok(StateValue::ChangeMetadata(fs.read_file(&path).await.map(|s| s.to_string()))) }
            })
            .await?;
        match value {
            StateValue::ChangeMetadata(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_artifact_output(
        self: &Rc<Self>,
        id: &str,
        output_path: &str,
    ) -> Result<Option<String>, KernelError> {
        let key = keys::change_artifact(id, "artifactOutput", output_path);
        let token = self.entities.ensure(&format!("change:{id}"));
        let fs = self.fs.clone();
        let root = self.change_dir(id);
        let output_path_owned = output_path.to_string();
        let value = self
            .ensure_raw(key, token, move || {
                let fs = fs.clone();
                let root = root.clone();
                let output_path = output_path_owned.clone();
                async move {
                    let path = resolve_within(&root, &output_path)?;
                    Ok(StateValue::ArtifactOutput(fs.read_file(&path).await.map(|s| s.to_string())))
                }
            })
            .await?;
        match value {
            StateValue::ArtifactOutput(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    pub async fn ensure_glob_artifact_files(
        self: &Rc<Self>,
        id: &str,
        output_path: &str,
    ) -> Result<Vec<GlobFileMatch>, KernelError> {
        let key = keys::change_artifact(id, "globArtifactFiles", output_path);
        let token = self.entities.ensure(&format!("change:{id}"));
        let fs = self.fs.clone();
        let root = self.change_dir(id);
        let output_path_owned = output_path.to_string();
        let value = self
            .ensure_raw(key, token, move || {
                let fs = fs.clone();
                let root = root.clone();
                let output_path = output_path_owned.clone();
                async move {
                    let relative_paths = glob_match::matching_relative_paths(&root, &output_path)?;
                    let mut matches = Vec::new();
                    for relative in relative_paths {
                        let full = root.join(&relative);
                        let content = fs.read_file(&full).await.map(|s| s.to_string()).unwrap_or_default();
                        matches.push(GlobFileMatch { path: relative, content });
                    }
                    Ok(StateValue::GlobArtifactFiles(matches))
                }
            })
            .await?;
        match value {
            StateValue::GlobArtifactFiles(v) => Ok(v),
            _ => unreachable!(),
        }
    }

    // ---- warm-up and dynamic reconciliation --------------------------------

    /// Idempotent; concurrent callers all await the same result (§4.6).
    pub async fn warmup(self: &Rc<Self>) -> Result<(), KernelError> {
        if self.warmup_started.get() {
            return self.wait_for_warmup().await;
        }
        self.warmup_started.set(true);

        // Phase A — in parallel: none of these three depends on another.
        let (schemas, change_ids, _) = tokio::join!(
            self.ensure_schemas(),
            self.ensure_change_ids(),
            self.ensure_project_config(),
        );

        if let Err(err) = &schemas {
            // §7 Startup: Phase A failing entirely means the workspace is
            // offline; subsequent ensureX calls reject with the cause.
            self.finish_warmup(Err(err.clone()));
            return Err(err.clone());
        }
        let schema_names: Vec<String> = schemas
            .as_ref()
            .map(|list| list.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default();
        let change_ids = change_ids.unwrap_or_default();

        // Phase B
        for name in &schema_names {
            self.start_schema_entity(name).await;
        }
        let _ = self.ensure_templates(None).await;
        let _ = self.ensure_template_contents(None).await;

        // Phase C
        for id in &change_ids {
            self.start_change_entity(id).await;
        }

        // Phase D
        let _ = self.ensure_status_list().await;

        // Dynamic: reconcile on every future schemas/changeIds change.
        self.watch_dynamic_entities();

        self.finish_warmup(Ok(()));
        Ok(())
    }

    async fn start_schema_entity(self: &Rc<Self>, name: &str) {
        let _ = self.ensure_schema_resolution(name).await;
        let _ = self.ensure_schema_detail(name).await;
        let _ = self.ensure_schema_files(name).await;
        let _ = self.ensure_schema_yaml(name).await;
        let _ = self.ensure_templates(Some(name)).await;
        let _ = self.ensure_template_contents(Some(name)).await;
    }

    async fn start_change_entity(self: &Rc<Self>, id: &str) {
        let _ = self.ensure_change_status(id, None).await;
        let _ = self.ensure_change_metadata(id).await;
        let _ = self.ensure_apply_instructions(id, None).await;
    }

    /// §4.6 Dynamic: added entities get warmed up, removed ones are torn
    /// down via the two-phase sweep (`EntityRegistry::remove` aborts the
    /// token, `StateStore::remove_prefix` deletes the state keys).
    fn watch_dynamic_entities(self: &Rc<Self>) {
        let this = self.clone();
        self.state.on_change(&keys::global("schemas"), move |v| {
            if let StateValue::Schemas(schemas) = v {
                this.reconcile_schemas(schemas);
            }
        });
        let this = self.clone();
        self.state.on_change(&keys::global("changeIds"), move |v| {
            if let StateValue::ChangeIds(ids) = v {
                this.reconcile_changes(ids);
            }
        });
    }

    fn reconcile_schemas(self: &Rc<Self>, schemas: &[openspec_cli::SchemaInfo]) {
        let wanted: HashSet<String> = schemas.iter().map(|s| s.name.clone()).collect();
        let existing: Vec<String> = self
            .entities
            .entity_keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix("schema:").map(|s| s.to_string()))
            .collect();

        for name in &wanted {
            if !existing.contains(name) {
                let this = self.clone();
                let name = name.clone();
                tokio::task::spawn_local(async move { this.start_schema_entity(&name).await });
            }
        }
        for name in &existing {
            if !wanted.contains(name) {
                self.entities.remove(&format!("schema:{name}"));
                self.state.remove_prefix(&keys::schema_entity_prefix(name));
            }
        }
    }

    fn reconcile_changes(self: &Rc<Self>, ids: &[String]) {
        let wanted: HashSet<String> = ids.iter().cloned().collect();
        let existing: Vec<String> = self
            .entities
            .entity_keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix("change:").map(|s| s.to_string()))
            .collect();

        for id in &wanted {
            if !existing.contains(id) {
                let this = self.clone();
                let id = id.clone();
                tokio::task::spawn_local(async move { this.start_change_entity(&id).await });
            }
        }
        for id in &existing {
            if !wanted.contains(id) {
                self.entities.remove(&format!("change:{id}"));
                self.state.remove_prefix(&keys::change_entity_prefix(id));
            }
        }
    }

    fn finish_warmup(&self, result: Result<(), KernelError>) {
        *self.warmup_result.borrow_mut() = Some(result.clone());
        for waiter in self.warmup_waiters.borrow_mut().drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    pub async fn wait_for_warmup(&self) -> Result<(), KernelError> {
        if let Some(result) = self.warmup_result.borrow().clone() {
            return result;
        }
        let (tx, rx) = oneshot::channel();
        self.warmup_waiters.borrow_mut().push(tx);
        rx.await.unwrap_or(Ok(()))
    }

    /// C8: taps into the already-running effect for `key` rather than
    /// starting a new one. Returns `None` if `key` has never been
    /// ensured — callers should `ensureX` (or await `warmup`) first.
    pub fn subscribe(
        self: &Rc<Self>,
        key: &str,
    ) -> Option<(crate::bridge::SubscriptionHandle, tokio::sync::watch::Receiver<Option<StateValue>>)> {
        let value_slot = self.state.value_handle(key)?;
        let (tx, rx) = tokio::sync::watch::channel(value_slot.get());
        let listener_id = value_slot.on_change(move |v| {
            let _ = tx.send(v.clone());
        });

        let cancel = CancellationToken::new();
        let cancel_for_wait = cancel.clone();
        let value_slot_for_unsub = value_slot.clone();
        tokio::task::spawn_local(async move {
            cancel_for_wait.cancelled().await;
            value_slot_for_unsub.unsubscribe(listener_id);
        });

        Some((crate::bridge::SubscriptionHandle::new(cancel), rx))
    }

    pub fn clear_for_test(&self) {
        self.state.clear();
        self.fs.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use async_trait::async_trait;
    use openspec_cli::{
        ApplyInstructions, ArtifactInstructions, CliCapability, CliError, SchemaInfo, SchemaResolution,
        SchemaSource, TemplatesMap,
    };
    use tempfile::TempDir;

    use super::*;

    /// A `CliCapability` backed entirely by in-memory fixtures, used in
    /// place of `ProcessCli` so kernel tests do not depend on a real
    /// `openspec` binary on PATH.
    struct FakeCli {
        schemas: Vec<SchemaInfo>,
        statuses: std::collections::HashMap<String, crate::types::ChangeStatus>,
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

        async fn status(
            &self,
            change_id: &str,
            _schema: Option<&str>,
        ) -> Result<openspec_cli::ChangeStatusRaw, CliError> {
            let status = self
                .statuses
                .get(change_id)
                .cloned()
                .ok_or_else(|| CliError::EmptyOutput {
                    subcommand: "status".to_string(),
                })?;
            Ok(openspec_cli::ChangeStatusRaw {
                change_name: status.change_name,
                artifacts: status
                    .artifacts
                    .into_iter()
                    .map(|a| openspec_cli::ArtifactStatusRaw {
                        id: a.id,
                        output_path: a.output_path,
                        status: a.status,
                        missing_deps: a.missing_deps,
                    })
                    .collect(),
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

    fn make_kernel(root: &std::path::Path, cli: FakeCli) -> Rc<Kernel> {
        let registry = DepRegistry::new();
        let fs = Rc::new(ReactiveFs::new(registry.clone(), Duration::from_millis(20)));
        Kernel::new(fs, Rc::new(cli), root.to_path_buf(), registry)
    }

    #[tokio::test]
    async fn cold_start_produces_exactly_one_status_list_entry() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = TempDir::new().unwrap();
                fs::create_dir_all(dir.path().join("openspec/changes/add-caching")).unwrap();
                fs::write(dir.path().join("openspec/config.yaml"), "team: demo").unwrap();

                let mut statuses = std::collections::HashMap::new();
                statuses.insert(
                    "add-caching".to_string(),
                    crate::types::ChangeStatus {
                        change_name: "add-caching".to_string(),
                        artifacts: Vec::new(),
                    },
                );
                let kernel = make_kernel(
                    dir.path(),
                    FakeCli {
                        schemas: Vec::new(),
                        statuses,
                    },
                );

                kernel.warmup().await.unwrap();

                let change_ids = kernel.ensure_change_ids().await.unwrap();
                assert_eq!(change_ids, vec!["add-caching".to_string()]);

                let status_list = kernel.ensure_status_list().await.unwrap();
                assert_eq!(status_list.len(), 1);
                assert_eq!(status_list[0].change_name, "add-caching");
            })
            .await;
    }

    #[tokio::test]
    async fn archiving_a_change_tears_down_its_state_keys() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = TempDir::new().unwrap();
                let changes_dir = dir.path().join("openspec/changes");
                fs::create_dir_all(changes_dir.join("add-caching")).unwrap();

                let mut statuses = std::collections::HashMap::new();
                statuses.insert(
                    "add-caching".to_string(),
                    crate::types::ChangeStatus {
                        change_name: "add-caching".to_string(),
                        artifacts: Vec::new(),
                    },
                );
                let kernel = make_kernel(
                    dir.path(),
                    FakeCli {
                        schemas: Vec::new(),
                        statuses,
                    },
                );
                kernel.warmup().await.unwrap();
                assert!(kernel.peek(&keys::change("add-caching", "status", None)).is_some());

                fs::create_dir_all(changes_dir.join("archive")).unwrap();
                fs::rename(
                    changes_dir.join("add-caching"),
                    changes_dir.join("archive/add-caching"),
                )
                .unwrap();

                tokio::time::sleep(Duration::from_millis(200)).await;
                // drive the changeIds effect's rerun and the dynamic-reconcile listener
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                }
                let _ = kernel.ensure_change_ids().await;
                for _ in 0..5 {
                    tokio::task::yield_now().await;
                }

                assert!(kernel.peek(&keys::change("add-caching", "status", None)).is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn get_on_never_ensured_key_is_missing_key() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dir = TempDir::new().unwrap();
                let kernel = make_kernel(
                    dir.path(),
                    FakeCli {
                        schemas: Vec::new(),
                        statuses: std::collections::HashMap::new(),
                    },
                );
                assert!(matches!(
                    kernel.get(&keys::global("schemas")),
                    Err(KernelError::MissingKey { .. })
                ));
                assert!(kernel.peek(&keys::global("schemas")).is_none());
            })
            .await;
    }
}
