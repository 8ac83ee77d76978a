use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wallet_topup::api::{self, PaymentsState};
use wallet_topup::config::{AppConfig, DatabaseConfig};
use wallet_topup::database::{GatewayTransactionStore, InMemoryGatewayTransactionStore};
use wallet_topup::health::HealthChecker;
use wallet_topup::logging::init_tracing;
use wallet_topup::middleware::logging::{request_logging_middleware, UuidRequestId};
use wallet_topup::payments::{JazzCashClient, PaymentGateway};
use wallet_topup::services::PaymentOrchestrator;
use wallet_topup::workers::{GatewayRateLimiter, PollingSupervisor};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(feature = "database")]
async fn connect_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn GatewayTransactionStore>> {
    use wallet_topup::database::gateway_transaction_repository::GatewayTransactionRepository;
    use wallet_topup::database::{init_pool_from_config, run_migrations};

    info!("📊 Initializing database connection pool...");
    let pool = init_pool_from_config(config).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    run_migrations(&pool).await?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );
    Ok(Arc::new(GatewayTransactionRepository::new(pool)))
}

#[cfg(not(feature = "database"))]
async fn connect_store(_config: &DatabaseConfig) -> anyhow::Result<Arc<dyn GatewayTransactionStore>> {
    warn!("DATABASE_URL is set but the `database` feature is disabled; using in-memory store");
    Ok(Arc::new(InMemoryGatewayTransactionStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    let skip_externals = std::env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting wallet top-up service"
    );

    let store: Arc<dyn GatewayTransactionStore> = match (&config.database, skip_externals) {
        (Some(database), false) => connect_store(database).await?,
        (_, true) => {
            info!("⏭️  Skipping database initialization (SKIP_EXTERNALS=true)");
            Arc::new(InMemoryGatewayTransactionStore::new())
        }
        (None, false) => {
            warn!("DATABASE_URL not set; transactions are kept in memory only");
            Arc::new(InMemoryGatewayTransactionStore::new())
        }
    };

    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(JazzCashClient::new(config.gateway.clone()).map_err(|e| {
            error!("❌ Failed to initialize payment gateway client: {}", e);
            e
        })?);
    info!(
        wallet_url = %config.gateway.wallet_payment_url,
        inquiry_url = %config.gateway.status_inquiry_url,
        timeout_secs = config.gateway.timeout_secs,
        "✅ Payment gateway client initialized"
    );

    let limiter = GatewayRateLimiter::new(config.polling.max_concurrent);
    let supervisor = Arc::new(PollingSupervisor::new(
        store.clone(),
        gateway.clone(),
        limiter,
        config.polling.clone(),
    ));
    info!(
        interval_secs = config.polling.interval.as_secs(),
        deadline_secs = config.polling.deadline.as_secs(),
        max_concurrent = config.polling.max_concurrent,
        "✅ Polling supervisor ready"
    );

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        gateway,
        supervisor.clone(),
        config.orchestrator.clone(),
    ));

    let state = PaymentsState {
        orchestrator,
        health_checker: HealthChecker::new(store, supervisor.clone()),
    };

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
        .await
        .is_err()
    {
        error!("Timed out waiting for poll loops to stop");
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
