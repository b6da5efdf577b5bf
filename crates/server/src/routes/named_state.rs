//! The §6 RPC surface: one `ensureX`/`getX`/`peekX` route per NamedState,
//! collapsed onto a single handler per state shape via a `mode` query
//! param, in the spirit of the teacher's `Query<...>`-extractor route
//! handlers (e.g. `routes/execution_processes.rs`).

use axum::{
    Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json,
};
use kernel::KernelError;
use serde::Deserialize;
use utils::response::{ApiError, ApiResponse};

use crate::{kernel_actor::NamedState, state::AppState};

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    #[default]
    Ensure,
    Get,
    Peek,
}

#[derive(Debug, Deserialize)]
struct ModeQuery {
    #[serde(default)]
    mode: Mode,
}

#[derive(Debug, Deserialize)]
struct SchemaQuery {
    #[serde(default)]
    mode: Mode,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtifactOutputQuery {
    #[serde(default)]
    mode: Mode,
    path: String,
}

#[derive(Debug, Deserialize)]
struct InstructionsQuery {
    #[serde(default)]
    mode: Mode,
    schema: Option<String>,
}

async fn resolve(state: &AppState, named: NamedState, mode: Mode) -> Result<impl IntoResponse, ApiError> {
    let value = match mode {
        Mode::Ensure => Some(state.kernel.ensure(named).await.map_err(kernel_error_to_api)?),
        Mode::Get => Some(state.kernel.get(named).await.map_err(kernel_error_to_api)?),
        Mode::Peek => state.kernel.peek(named).await,
    };
    Ok(Json(ApiResponse::success(value)))
}

fn kernel_error_to_api(err: KernelError) -> ApiError {
    match err {
        KernelError::MissingKey { .. } => ApiError::NotFound(err.to_string()),
        KernelError::PathSafety => ApiError::BadRequest(err.to_string()),
        other => ApiError::Internal(other.to_string()),
    }
}

async fn schemas(State(state): State<AppState>, Query(q): Query<ModeQuery>) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::Schemas, q.mode).await
}

async fn change_ids(
    State(state): State<AppState>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::ChangeIds, q.mode).await
}

async fn project_config(
    State(state): State<AppState>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::ProjectConfig, q.mode).await
}

async fn status_list(
    State(state): State<AppState>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::StatusList, q.mode).await
}

async fn schema_resolution(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::SchemaResolution { name }, q.mode).await
}

async fn schema_yaml(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::SchemaYaml { name }, q.mode).await
}

async fn schema_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::SchemaDetail { name }, q.mode).await
}

async fn schema_files(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::SchemaFiles { name }, q.mode).await
}

async fn templates(
    State(state): State<AppState>,
    Query(q): Query<SchemaQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::Templates { schema: q.schema }, q.mode).await
}

async fn template_contents(
    State(state): State<AppState>,
    Query(q): Query<SchemaQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::TemplateContents { schema: q.schema }, q.mode).await
}

async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SchemaQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::ChangeStatus { id, schema: q.schema }, q.mode).await
}

async fn artifact_instructions(
    State(state): State<AppState>,
    Path((id, artifact)): Path<(String, String)>,
    Query(q): Query<InstructionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(
        &state,
        NamedState::ArtifactInstructions { id, artifact, schema: q.schema },
        q.mode,
    )
    .await
}

async fn apply_instructions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SchemaQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::ApplyInstructions { id, schema: q.schema }, q.mode).await
}

async fn change_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ModeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(&state, NamedState::ChangeMetadata { id }, q.mode).await
}

async fn artifact_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ArtifactOutputQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(
        &state,
        NamedState::ArtifactOutput { id, output_path: q.path },
        q.mode,
    )
    .await
}

async fn glob_artifact_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ArtifactOutputQuery>,
) -> Result<impl IntoResponse, ApiError> {
    resolve(
        &state,
        NamedState::GlobArtifactFiles { id, output_path: q.path },
        q.mode,
    )
    .await
}

async fn warmup(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .kernel
        .warmup()
        .await
        .map_err(kernel_error_to_api)?;
    Ok(Json(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/warmup", axum::routing::post(warmup))
        .route("/schemas", get(schemas))
        .route("/change-ids", get(change_ids))
        .route("/project-config", get(project_config))
        .route("/status-list", get(status_list))
        .route("/schemas/{name}/resolution", get(schema_resolution))
        .route("/schemas/{name}/yaml", get(schema_yaml))
        .route("/schemas/{name}/detail", get(schema_detail))
        .route("/schemas/{name}/files", get(schema_files))
        .route("/templates", get(templates))
        .route("/template-contents", get(template_contents))
        .route("/changes/{id}/status", get(change_status))
        .route(
            "/changes/{id}/artifacts/{artifact}/instructions",
            get(artifact_instructions),
        )
        .route("/changes/{id}/apply-instructions", get(apply_instructions))
        .route("/changes/{id}/metadata", get(change_metadata))
        .route("/changes/{id}/artifact-output", get(artifact_output))
        .route("/changes/{id}/glob-artifact-files", get(glob_artifact_files))
}
