use agenda::api;
use agenda::channel_fetcher::TelegramFetcher;
use agenda::clock::SystemClock;
use agenda::configuration::{Config, DEFAULT_CONFIG_PATH};
use agenda::poller::PlatformPoller;
use agenda::repost_service::RepostService;
use agenda::selection::{GlobalSelector, SimpleLocalSelector};
use agenda::storage::FileStore;
use anyhow::{Context, Result, bail};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config_path = env::var("AGENDA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    info!(path = %config_path.display(), "Reading YAML configuration");
    let config = Config::load(&config_path)?;

    let store = FileStore::new(&config.storage.path);
    let reposts = Arc::new(
        RepostService::open(store, Arc::new(SystemClock))
            .with_context(|| format!("cannot open store at {}", config.storage.path.display()))?,
    );

    let shutdown = CancellationToken::new();
    let selector = Arc::new(GlobalSelector::new(SimpleLocalSelector::new()));
    let telegram = Arc::new(TelegramFetcher::new());

    let mut handles = Vec::new();
    for (platform, platform_config) in &config.platforms {
        let fetcher = match platform.as_str() {
            "telegram" => Arc::clone(&telegram),
            other => bail!("no fetcher for platform {}", other),
        };
        let poller = PlatformPoller::new(
            platform.as_str(),
            platform_config.clone(),
            fetcher,
            Arc::clone(&selector),
            Arc::clone(&reposts),
        );
        handles.push(poller.spawn(shutdown.child_token()));
    }

    let listen = config.api.listen.clone();
    let app = api::router(Arc::clone(&reposts));
    let api_shutdown = shutdown.child_token();
    let api_handle = tokio::spawn(async move { api::serve(&listen, app, api_shutdown).await });
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    // The API only returns once shutdown began or it failed on its own
    // (e.g. the port is taken); either way the pollers go down with it.
    let api_result = api_handle
        .await
        .map_err(anyhow::Error::from)
        .and_then(|served| served);
    shutdown.cancel();

    for res in futures::future::join_all(handles).await {
        if let Err(e) = res {
            error!(error = %e, "Poller task panicked");
        }
    }

    if let Err(e) = api_result {
        error!(error = %e, "API server failed");
        return Err(e.context("API server failed"));
    }
    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on the first SIGINT or SIGTERM. Returns without doing
/// anything if the token is cancelled some other way first.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        () = shutdown.cancelled() => return,
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "Shutting down");
    shutdown.cancel();
}
