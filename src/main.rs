use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use iprepd::{
    AppState, ExceptionList, ExceptionPredicate, IprepdConfig, MemoryStore, NoExceptions,
    RedisStore, ReputationManager, ReputationStore, SecurityMiddlewareConfig, SecurityState,
    config::StoreBackend, create_router,
};

/// How often the in-memory store drops expired entries
const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first
    let config = IprepdConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check IPREPD_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting iprepd reputation service");
    info!(
        "Auth enabled: {}, API keys: {}, read-only keys: {}, hawk ids: {}, read-only hawk ids: {}",
        !config.auth.disable_auth,
        config.auth.api_keys.len(),
        config.auth.ro_api_keys.len(),
        config.auth.hawk.len(),
        config.auth.ro_hawk.len()
    );

    let store = create_store(&config).await?;
    let exceptions = load_exceptions(&config).await?;

    let manager = ReputationManager::new(store, config.violation_catalog())
        .with_decay(config.decay_settings())
        .with_normalizer(config.key_normalizer())
        .with_exceptions(exceptions);
    info!(
        "Scoring initialized: violations={}, decay_points={}, decay_interval_secs={}, ip6_prefix={}",
        manager.violations().len(),
        config.decay.points,
        config.decay.interval_secs,
        config.ip6_prefix
    );

    let state = AppState::new(Arc::new(manager), config.server.version_response.clone());
    let security_state = SecurityState::new(SecurityMiddlewareConfig::from_config(&config));
    let app = create_router(state, security_state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.server.listen, e))?;

    info!("iprepd listening on {}", config.server.listen);
    info!(
        "Security middleware: Auth={}, Max body={}KB",
        !config.auth.disable_auth,
        config.security.max_request_size / 1024
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging from configuration
fn init_logging(config: &IprepdConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Connect the configured store; an unreachable redis is fatal
async fn create_store(config: &IprepdConfig) -> Result<Arc<dyn ReputationStore>> {
    match config.store {
        StoreBackend::Memory => {
            warn!("Using in-memory store - reputation data will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            store.spawn_cleanup(MEMORY_CLEANUP_INTERVAL);
            Ok(store)
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_options())
                .await
                .with_context(|| format!("Failed to connect to redis at {}", config.redis.addr))?;
            Ok(Arc::new(store))
        }
    }
}

/// Load exception files and start the background refresh
async fn load_exceptions(config: &IprepdConfig) -> Result<Arc<dyn ExceptionPredicate>> {
    if config.exceptions.files.is_empty() {
        return Ok(Arc::new(NoExceptions));
    }

    let list = ExceptionList::new();
    let count = list
        .load_files(&config.exceptions.files)
        .await
        .context("Failed to load exception files")?;
    info!(
        "Loaded {} exception entries from {} file(s)",
        count,
        config.exceptions.files.len()
    );

    list.spawn_refresh(
        config.exceptions.files.clone(),
        config.exception_refresh_interval(),
    );

    Ok(Arc::new(list))
}
