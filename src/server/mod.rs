//! HTTP server assembly
//!
//! Thin layer over the replay API: builds the router, binds, and serves.

pub mod replay_api;

pub use replay_api::{create_replay_router, ApiState};

use tracing::info;

use crate::error::Result;

/// Initialize tracing from `RUST_LOG`, defaulting to `info`.
///
/// Call once at process start; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Bind `addr` and serve the replay API until the process exits.
pub async fn serve(addr: &str, state: ApiState) -> Result<()> {
    let router = create_replay_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "replay API listening");
    axum::serve(listener, router).await?;
    Ok(())
}
