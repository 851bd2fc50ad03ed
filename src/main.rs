//! Application entry point.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ledger_sync::api::create_router;
use ledger_sync::app::{
    AppState, RateBudget, RateBudgetConfig, RetryPolicy, SharedStatus, StatusTracker, SyncConfig,
    SyncService, WindowConfig, spawn_sync_worker,
};
use ledger_sync::infra::{EtherscanClient, ExplorerConfig, FileStatusReporter, JsonFileStore};

/// Application configuration
struct Config {
    api_keys: Vec<SecretString>,
    explorer: ExplorerConfig,
    store_path: PathBuf,
    status_path: PathBuf,
    rate_budget: RateBudgetConfig,
    window: WindowConfig,
    retry: RetryPolicy,
    sync: SyncConfig,
    enable_status_server: bool,
    host: String,
    port: u16,
}

impl Config {
    fn from_env() -> Result<Self> {
        let api_keys = Self::load_api_keys()?;
        let explorer = ExplorerConfig::from_env().context("Invalid explorer configuration")?;

        let store_path = env::var("STORE_PATH")
            .unwrap_or_else(|_| "transactions.json".to_string())
            .into();
        let status_path = env::var("STATUS_PATH")
            .unwrap_or_else(|_| "sync_status.json".to_string())
            .into();

        let enable_status_server = env::var("ENABLE_STATUS_SERVER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        Ok(Self {
            api_keys,
            explorer,
            store_path,
            status_path,
            rate_budget: RateBudgetConfig::from_env(),
            window: WindowConfig::from_env(),
            retry: RetryPolicy::from_env(),
            sync: SyncConfig::from_env(),
            enable_status_server,
            host,
            port,
        })
    }

    fn load_api_keys() -> Result<Vec<SecretString>> {
        let raw = env::var("EXPLORER_API_KEYS").map_err(|_| {
            anyhow::anyhow!(
                "EXPLORER_API_KEYS environment variable is not set.\n\
                 Provide one or more comma-separated explorer API keys."
            )
        })?;

        let keys: Vec<SecretString> = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .collect();

        if keys.is_empty() {
            anyhow::bail!("EXPLORER_API_KEYS is empty. Provide at least one explorer API key.");
        }
        Ok(keys)
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json = env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Ledger Sync v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!(
        token = %config.explorer.contract_address,
        origin = config.sync.origin,
        credentials = config.api_keys.len(),
        store = %config.store_path.display(),
        "Initializing sync engine"
    );

    let explorer = EtherscanClient::new(config.explorer.clone())
        .context("Failed to build explorer HTTP client")?;
    let store = JsonFileStore::new(&config.store_path);
    let budget = Arc::new(RateBudget::new(config.api_keys, config.rate_budget)?);

    let shared_status = Arc::new(SharedStatus::new());
    let status = Arc::new(
        StatusTracker::new(config.sync.origin, Arc::clone(&budget))
            .with_reporter(Arc::new(FileStatusReporter::new(&config.status_path)))
            .with_reporter(shared_status.clone()),
    );
    info!(path = %config.status_path.display(), "Status file reporter enabled");

    let service = Arc::new(SyncService::new(
        config.sync,
        Arc::new(explorer),
        Arc::new(store),
        budget,
        config.window,
        config.retry,
        status,
    ));

    let (worker_handle, worker_shutdown_tx) = spawn_sync_worker(service);
    info!("Sync worker started");

    if config.enable_status_server {
        let router = create_router(Arc::new(AppState::new(shared_status)));
        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        info!("Status API listening on http://{}", addr);
        info!("Swagger UI available at http://{}/swagger-ui", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        info!("Status API disabled");
        shutdown_signal().await;
    }

    // Signal the worker and wait for its current persist to finish
    let _ = worker_shutdown_tx.send(true);
    worker_handle.await.context("Sync worker panicked")?;

    info!("Shutdown complete");
    Ok(())
}
