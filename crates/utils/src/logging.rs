//! Tracing init, grounded on `server/src/main.rs`'s layered
//! `tracing_subscriber::registry()` setup (RUST_LOG-driven per-crate filter
//! string).

use tracing_subscriber::{EnvFilter, prelude::*};

/// Installs the global tracing subscriber. Panics if called more than once
/// per process, same as the teacher's `main.rs`.
pub fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string =
        format!("warn,server={level},kernel={level},reactive={level},reactive_fs={level},openspec_cli={level},utils={level}", level = log_level);

    let filter = EnvFilter::try_new(&filter_string).expect("failed to build tracing filter");

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .init();
}
