use crm_auth::{
    build_router,
    config::{AuthConfig, RateLimitBackend},
    services::{AttemptStore, InMemoryAttemptStore, InMemoryUserStore, RedisAttemptStore, TracingAuditSink},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::watch};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let attempts: Arc<dyn AttemptStore> = match config.rate_limit.backend {
        RateLimitBackend::Memory => Arc::new(InMemoryAttemptStore::new()),
        RateLimitBackend::Redis => {
            let url = config.rate_limit.redis_url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("REDIS_URL is required for the redis backend"))
            })?;
            Arc::new(RedisAttemptStore::new(url).await?)
        }
    };
    tracing::info!(backend = ?config.rate_limit.backend, "Rate limit store initialized");

    // Users are held in process.
    let users = Arc::new(InMemoryUserStore::new());
    let state = AppState::new(config.clone(), users, attempts, Arc::new(TracingAuditSink))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = state.sweeper().spawn(
        Duration::from_secs(config.rate_limit.sweep_interval_seconds),
        shutdown_rx,
    );

    let app = build_router(state)?;

    let listener = tokio::net::TcpListener::bind(config.common.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening");

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.common.shutdown_grace_seconds))
    .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Sweeper task ended abnormally");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace_seconds: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tokio::time::sleep(Duration::from_secs(grace_seconds)).await;
}
