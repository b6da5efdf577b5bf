use server::{kernel_actor::KernelHandle, routes, shutdown_signal, state::AppState};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utils::{
    config::{ConfigError, KernelConfig},
    logging,
    workspace_lock::{WorkspaceLock, WorkspaceLockOutcome},
};

#[derive(Debug, Error)]
pub enum OpenSpecUiError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[tokio::main]
async fn main() -> Result<(), OpenSpecUiError> {
    logging::init_tracing();

    let config = KernelConfig::from_env()?;
    tracing::info!(
        workspace_root = %config.workspace_root.display(),
        "starting openspec-ui kernel server"
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let actual_addr = listener.local_addr()?;

    let lock = match WorkspaceLock::acquire(&config.workspace_root, actual_addr.port()).await? {
        WorkspaceLockOutcome::Acquired(lock) => Some(lock),
        WorkspaceLockOutcome::AlreadyLocked { owner_pid } => {
            tracing::warn!(
                owner_pid,
                "another kernel process already owns this workspace; continuing anyway"
            );
            None
        }
    };

    let kernel = KernelHandle::spawn(
        config.workspace_root.clone(),
        config.openspec_bin.clone(),
        config.debounce_ms,
    );
    if let Err(err) = kernel.warmup().await {
        tracing::error!(%err, "warm-up failed; serving in degraded mode");
    }

    let state = AppState {
        kernel: kernel.clone(),
    };
    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("listening on http://{actual_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    kernel.shutdown().await;
    if let Some(lock) = lock {
        lock.release().await;
    }

    Ok(())
}
