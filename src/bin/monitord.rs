use std::sync::Arc;

use clap::Parser;
use node_monitoring::{
    api::{
        ApiConfig, ApiState, StaticSessionStore, StaticShareTokenStore, spawn_api_server,
    },
    config::{CacheSettings, Config, StorageConfig, read_config_file},
    hub::HubHandle,
    scheduler::MetricsScheduler,
    settings::SettingsCache,
    storage::{StorageBackend, sqlite::SqliteBackend},
};
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("node_monitoring", LevelFilter::TRACE),
        ("monitord", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return Err(anyhow::anyhow!("configuration validation failed: {}", e));
    }

    run_monitoring(config).await?;

    Ok(())
}

/// Run the monitoring core: storage, settings cache, scheduler, hub, edge.
async fn run_monitoring(config: Config) -> anyhow::Result<()> {
    let storage_config = config.storage.clone().unwrap_or_default();
    let StorageConfig::Sqlite { ref path } = storage_config;

    let retention = config
        .retention
        .clone()
        .unwrap_or_default()
        .to_retention_policy();

    info!("initializing SQLite backend at: {:?}", path);
    let store: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(path).await?.with_retention(retention));
    info!("storage backend initialized");

    // Settings cache: one synchronous load, then periodic refresh. A
    // failed initial load leaves the cache empty and readers on defaults.
    let settings_cache = Arc::new(SettingsCache::new(store.clone()).await);
    info!(
        "settings cache loaded (version cursor: {})",
        settings_cache.version()
    );

    let cache_settings = config.cache.clone().unwrap_or_default();
    let (refresh_stop_tx, refresh_stop_rx) = watch::channel(false);
    let refresh_task = tokio::spawn(cache_refresh_loop(
        settings_cache.clone(),
        cache_settings,
        refresh_stop_rx,
    ));

    // Broadcast hub for live node status.
    let hub = HubHandle::spawn();
    info!("broadcast hub started");

    // Periodic rollup and retention.
    let scheduler_settings = config.scheduler.clone().unwrap_or_default();
    let scheduler = MetricsScheduler::start(store.clone(), scheduler_settings.to_scheduler_config());

    // API server if configured.
    if let Some(api_settings) = config.api {
        let bind_addr: std::net::SocketAddr =
            format!("{}:{}", api_settings.bind, api_settings.port).parse()?;

        let mut sessions = StaticSessionStore::new();
        if let Some(ref admin_token) = api_settings.admin_token {
            sessions = sessions.with_admin(admin_token.clone());
        } else {
            warn!("no admin_token configured, settings endpoints are unreachable");
        }
        let share_tokens = StaticShareTokenStore::new(api_settings.share_tokens.clone());

        let api_state = ApiState::new(
            store.clone(),
            settings_cache.clone(),
            hub.clone(),
            Arc::new(sessions),
            Arc::new(share_tokens),
        );

        let api_config = ApiConfig {
            bind_addr,
            enable_cors: api_settings.enable_cors,
        };

        match spawn_api_server(api_config, api_state).await {
            Ok(addr) => info!("API server started on http://{}", addr),
            Err(e) => error!("failed to start API server: {}", e),
        }
    } else {
        info!("API server disabled (not configured)");
    }

    info!("press Ctrl+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping..."),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    info!("stopping scheduler...");
    scheduler.stop().await;

    info!("stopping cache refresh loop...");
    let _ = refresh_stop_tx.send(true);
    let _ = refresh_task.await;

    info!("closing storage backend...");
    if let Err(e) = store.close().await {
        error!("error closing storage backend: {}", e);
    }

    info!("shutdown complete");
    Ok(())
}

/// Periodically reload the settings cache so out-of-band writes (other
/// processes, manual SQL) become visible.
async fn cache_refresh_loop(
    cache: Arc<SettingsCache>,
    settings: CacheSettings,
    mut stop_rx: watch::Receiver<bool>,
) {
    let interval = std::time::Duration::from_secs(settings.refresh_interval_secs.max(1));

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = cache.refresh().await {
                    warn!("settings cache refresh failed: {}", e);
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}
