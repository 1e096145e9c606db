use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod context;
pub mod directory;
pub mod dispatch;
pub mod mailer;
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod sanitize;
pub mod utils;
pub mod validate;

pub use relay_error::{AppError, AppResult};

use config::{Config, RateStoreKind};
use context::AppContext;
use directory::PgDirectory;
use mailer::HttpMailer;
use rate_limit::{MemoryRateStore, RateLimiter, RateStore, RedisRateStore};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Connect to the coach directory
    let directory = Arc::new(PgDirectory::connect(&config.database_url).await?);
    tracing::info!("Connected to directory database");

    // Pick the rate-store backend
    let store: Arc<dyn RateStore> = match config.rate_store {
        RateStoreKind::Redis => {
            let store = tokio::time::timeout(
                Duration::from_secs(10),
                RedisRateStore::connect(&config.redis_url),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timed out after 10 seconds"))??;
            tracing::info!("Connected to Redis rate store");
            Arc::new(store)
        }
        RateStoreKind::Memory => {
            tracing::info!("Using in-process rate store");
            Arc::new(MemoryRateStore::new())
        }
    };

    let rate_limiter = RateLimiter::new(
        store,
        config.security.max_contacts_per_window,
        Duration::from_secs(config.security.contact_window_secs),
    );

    let mailer = Arc::new(HttpMailer::new(config.mail.clone())?);

    // Create application context and router
    let app_context = Arc::new(AppContext::new(
        config.clone(),
        rate_limiter,
        directory,
        mailer,
    ));
    let app = routes::create_router(app_context);

    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("Contact relay listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        tracing::info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
