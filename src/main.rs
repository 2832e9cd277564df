use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blueprint_exchange::api::{self, AppState};
use blueprint_exchange::broadcast::BroadcastHub;
use blueprint_exchange::cache::CacheManager;
use blueprint_exchange::config::AppConfig;
use blueprint_exchange::db::Database;
use blueprint_exchange::engine::EngineManager;
use blueprint_exchange::services::{
    EventStore, LifecycleService, MarketDataService, QueryService, TradingService,
};

/// Startup failure classes mapped to process exit codes.
enum StartupError {
    Config(String),
    Store(String),
    Cache(String),
    Serve(String),
}

impl StartupError {
    fn exit_code(&self) -> ExitCode {
        match self {
            StartupError::Config(_) => ExitCode::from(1),
            StartupError::Store(_) => ExitCode::from(2),
            StartupError::Cache(_) => ExitCode::from(3),
            StartupError::Serve(_) => ExitCode::FAILURE,
        }
    }

    fn message(&self) -> &str {
        match self {
            StartupError::Config(msg)
            | StartupError::Store(msg)
            | StartupError::Cache(msg)
            | StartupError::Serve(msg) => msg,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blueprint_exchange=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Startup failed: {}", e.message());
            e.exit_code()
        }
    }
}

async fn run() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load().map_err(|e| StartupError::Config(e.to_string()))?;

    tracing::info!("Starting Blueprint Exchange v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {} ({})", config.environment, config.server_id);

    // Prometheus exporter: the recorder lives for the whole process.
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Config(format!("metrics recorder: {e}")))?;

    // Relational store
    let db = Database::connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Store(e.to_string()))?;
    tracing::info!("Database connected, migrations applied");

    // Cache / bus / lock plane
    let cache = Arc::new(
        CacheManager::new(&config.redis_url, &config.server_id, config.lock_ttl)
            .await
            .map_err(|e| StartupError::Cache(e.to_string()))?,
    );
    tracing::info!("Cache manager initialized with Redis at {}", config.redis_url);

    // Matching engine with a supervisor for panicked market workers
    let (engine, mut engine_failures) = EngineManager::new(config.engine_queue_capacity);
    let engine = Arc::new(engine);

    let locks = cache.locks();
    let events = Arc::new(EventStore::new(
        db.pool.clone(),
        config.server_id.clone(),
        locks.clone(),
    ));
    let market_data = Arc::new(MarketDataService::new(db.pool.clone()));

    let trading = Arc::new(TradingService::new(
        db.pool.clone(),
        engine.clone(),
        events.clone(),
        locks.clone(),
        cache.clone(),
        market_data.clone(),
        config.platform_fee_rate,
        config.command_timeout,
    ));
    let query = Arc::new(QueryService::new(
        db.pool.clone(),
        cache.clone(),
        engine.clone(),
        market_data.clone(),
    ));
    let lifecycle = Arc::new(LifecycleService::new(
        db.pool.clone(),
        trading.clone(),
        market_data.clone(),
    ));

    let hub = Arc::new(BroadcastHub::new());

    // Engine failure supervisor: a panicked market worker gives up its
    // lock so a peer can recover the market from the store and log.
    {
        let engine = engine.clone();
        let locks = locks.clone();
        tokio::spawn(async move {
            while let Some(market) = engine_failures.recv().await {
                tracing::error!("Market {} worker failed, releasing ownership", market);
                engine.close_market(&market).await;
                if let Err(e) = locks.release(&market).await {
                    tracing::warn!("Failed to release lock for {}: {}", market, e);
                }
            }
        });
    }

    // Bus bridge: relay fleet-wide broadcast frames into the local hub.
    tokio::spawn(hub.clone().run_bus_bridge(cache.subscriber()));
    tokio::spawn(cache.subscriber().run());
    tracing::info!("Bus bridge started");

    // Lock heartbeat: renew held leases; markets whose lease is lost stop
    // being served here.
    {
        let locks = locks.clone();
        let engine = engine.clone();
        let interval = config.lock_renew_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for market in locks.renew_all().await {
                    tracing::warn!("Lost lease for {}, closing local worker", market);
                    engine.close_market(&market).await;
                }
            }
        });
    }

    // Expiry scheduler: resting orders past their expiry become
    // `expired` with their locks refunded.
    {
        let trading = trading.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                match trading.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Expired {} resting orders", n),
                    Err(e) => tracing::warn!("Expiry sweep failed: {}", e),
                }
            }
        });
    }

    // 24h window refresh: true up the incremental rollups.
    {
        let market_data = market_data.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let markets = match market_data.active_markets().await {
                    Ok(markets) => markets,
                    Err(e) => {
                        tracing::warn!("Failed to list markets for refresh: {}", e);
                        continue;
                    }
                };
                for market in markets {
                    if let Err(e) = market_data.refresh_24h(&market).await {
                        tracing::warn!("24h refresh failed for {}: {}", market, e);
                    }
                }
            }
        });
    }

    // Event retention + hub pruning.
    {
        let events = events.clone();
        let hub = hub.clone();
        let retention_days = config.event_retention_days;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                hub.prune();
                if let Err(e) = events.sweep_retention(retention_days).await {
                    tracing::warn!("Event retention sweep failed: {}", e);
                }
            }
        });
    }

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        db,
        cache,
        engine,
        events,
        market_data,
        trading: trading.clone(),
        query,
        lifecycle: lifecycle.clone(),
        hub,
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
        .merge(api::routes::create_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StartupError::Serve(e.to_string()))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(lifecycle))
        .await
        .map_err(|e| StartupError::Serve(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

/// Wait for SIGINT/SIGTERM, then drain queues and release market locks
/// before letting the server exit.
async fn shutdown_signal(lifecycle: Arc<LifecycleService>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining");
    if let Err(e) = lifecycle.drain().await {
        tracing::warn!("Drain failed during shutdown: {}", e);
    }
    tracing::info!("Drain complete, market locks released");
}
