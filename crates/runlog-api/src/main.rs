//! runlog-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use runlog_api::{parse_allowed_origins, router, ApiConfig, AppState, RateLimiter, StoreKind};
use runlog_core::RunRepository;
use runlog_db::{log_pool_metrics, Database, InMemoryRunRepository, PoolConfig};

/// Initialize tracing; the returned guard must outlive the server when
/// logging to a file.
fn init_tracing(config: &ApiConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "runlog_api=debug,runlog_db=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let log = &config.log;

    if let Some(ref path) = log.file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("runlog-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless forced
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log.ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log.json {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log.ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn open_store(config: &ApiConfig) -> anyhow::Result<Option<Arc<dyn RunRepository>>> {
    match config.store {
        StoreKind::Memory => {
            info!(store = "memory", "Using in-process run store");
            let store: Arc<dyn RunRepository> = Arc::new(InMemoryRunRepository::new());
            Ok(Some(store))
        }
        StoreKind::Postgres => {
            let Some(ref url) = config.database_url else {
                warn!("DATABASE_URL not set; run routes will answer 500 until configured");
                return Ok(None);
            };
            let pool_config = PoolConfig::new().require_tls(config.database_require_tls);
            let db = Database::connect_with_config(url, pool_config).await?;
            db.migrate().await?;
            log_pool_metrics(&db.pool);
            info!(store = "postgres", "Database connected and migrated");
            let store: Arc<dyn RunRepository> = Arc::new(db.runs);
            Ok(Some(store))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ApiConfig::from_env()?;
    let _file_guard = init_tracing(&config);

    info!(
        log_format = if config.log.json { "json" } else { "text" },
        log_file = config.log.file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    info!(
        enabled = config.rate_limit.enabled,
        window_secs = config.rate_limit.window.as_secs(),
        max = config.rate_limit.max,
        trust_proxy = config.trust_proxy,
        "Rate limiting configured"
    );

    let runs = open_store(&config).await?;
    let state = AppState::new(runs, RateLimiter::new(config.rate_limit.clone()))
        .with_trust_proxy(config.trust_proxy);
    let app = router(state, parse_allowed_origins(&config.allowed_origins));

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
