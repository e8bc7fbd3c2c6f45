//! HTTP read side of the repost queue.
//!
//! `GET /reposts` drains every repost not handed out yet and kicks off a purge
//! of old, already read entries in the background.

mod handlers;

pub use handlers::RepostMessage;

use crate::repost_service::RepostService;
use crate::storage::RepostStore;
use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn router<S>(reposts: Arc<RepostService<S>>) -> Router
where
    S: RepostStore + 'static,
{
    Router::new()
        .route("/reposts", get(handlers::reposts_get::<S>))
        .route("/health", get(handlers::health_get))
        .with_state(reposts)
}

/// Serve `app` on `listen` until `shutdown` is cancelled.
pub async fn serve(listen: &str, app: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind API server on {}", listen))?;
    info!(address = %listener.local_addr()?, "Running HTTP API");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("API server failed")?;

    info!("HTTP API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn serve_fails_when_address_is_taken() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen = taken.local_addr().unwrap().to_string();
        let reposts = Arc::new(RepostService::new(MemoryStore::new(), Arc::new(SystemClock)));

        let result = serve(&listen, router(reposts), CancellationToken::new()).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("failed to bind"));
    }

    #[tokio::test]
    async fn serve_returns_once_shutdown_is_cancelled() {
        let reposts = Arc::new(RepostService::new(MemoryStore::new(), Arc::new(SystemClock)));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        serve("127.0.0.1:0", router(reposts), shutdown).await.unwrap();
    }
}
