//! sessionauth binary entry point

use sessionauth::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize metrics
/// 4. Initialize AppState
/// 5. Build Axum router
/// 6. Start background session pruning
/// 7. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging (RUST_LOG wins over logging.level)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter().into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting sessionauth...");
    tracing::info!(
        federated = config.federated_enabled(),
        session_store = ?config.auth.session_store,
        trust_proxy = config.auth.trust_proxy,
        "Configuration loaded"
    );
    if !config.auth.secure_cookies {
        tracing::warn!("Session cookies are sent without the Secure attribute");
    }

    // 3. Initialize metrics
    sessionauth::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = sessionauth::build_router(state.clone());

    // 6. Start background tasks
    sessionauth::auth::spawn_prune_task(
        state.sessions.clone(),
        std::time::Duration::from_secs(config.auth.prune_interval_seconds),
    );
    tracing::info!(
        interval_seconds = config.auth.prune_interval_seconds,
        "Session prune task spawned"
    );

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
