//! sessionauth - Session-based authentication service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Password login / logout                                  │
//! │  - Federated (OIDC) login, callback, logout                 │
//! │  - Current-user query, health, metrics                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Auth Layer                             │
//! │  - Signed session cookie + session store                    │
//! │  - Authentication check with token refresh                  │
//! │  - OIDC client, discovery cache, per-domain strategies      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): users, sessions                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `auth`: Sessions, OIDC and the authentication check
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;

use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Session persistence
    pub sessions: Arc<dyn auth::SessionStore>,

    /// Credential validation and user upserts
    pub users: Arc<dyn data::UserStore>,

    /// Federated login; `None` outside the hosting environment
    pub federated: Option<Arc<auth::FederatedAuth>>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database and run migrations
    /// 2. Select the session store (the `sessions` table must already exist)
    /// 3. Set up federated login when configured
    ///
    /// # Errors
    /// Returns error if the database is unreachable or the sessions table is missing.
    /// An unreachable identity provider is logged and does not fail startup.
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Connect to SQLite database
        let db = Arc::new(
            data::Database::connect(&config.database.url, config.database.max_connections).await?,
        );

        // 2. Session store
        let sessions = match config.auth.session_store {
            config::SessionStoreKind::Database => {
                db.ensure_sessions_table().await?;
                Arc::clone(&db) as Arc<dyn auth::SessionStore>
            }
            config::SessionStoreKind::Memory => {
                tracing::warn!("Using in-memory session store; sessions are lost on restart");
                let ttl = Duration::from_secs(config.auth.session_ttl_seconds.unsigned_abs());
                Arc::new(auth::MemorySessionStore::new(ttl)) as Arc<dyn auth::SessionStore>
            }
        };
        tracing::info!(store = ?config.auth.session_store, "Session store ready");

        // 3. Federated login
        let federated = match &config.auth.oidc {
            Some(oidc) => {
                let http_client = reqwest::Client::builder()
                    .user_agent(concat!("sessionauth/", env!("CARGO_PKG_VERSION")))
                    .timeout(Duration::from_secs(30))
                    .build()
                    .map_err(|e| error::AppError::internal("Failed to build HTTP client", e))?;
                let provider = Arc::new(auth::oidc::OidcClient::new(
                    &oidc.issuer_url,
                    &oidc.client_id,
                    http_client,
                ));
                let discovery_ttl = Duration::from_secs(config.auth.discovery_ttl_seconds);

                Some(Arc::new(
                    auth::FederatedAuth::setup(oidc, provider, discovery_ttl).await,
                ))
            }
            None => {
                tracing::info!("REPL_ID not set; only password login is available");
                None
            }
        };

        tracing::info!("Application state initialized successfully");
        Ok(Self::from_parts(config, sessions, db, federated))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: config::AppConfig,
        sessions: Arc<dyn auth::SessionStore>,
        users: Arc<dyn data::UserStore>,
        federated: Option<Arc<auth::FederatedAuth>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            users,
            federated,
        }
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.auth);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::auth_router(&state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

/// Allow the configured login domains as origins; anything goes without them.
fn build_cors_layer(auth: &config::AuthConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    let domains = auth
        .oidc
        .as_ref()
        .map(config::OidcConfig::allowed_domains)
        .unwrap_or_default();
    if domains.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = domains
        .iter()
        .filter_map(|domain| {
            let origin = format!("https://{domain}");
            HeaderValue::from_str(&origin)
                .map_err(|error| {
                    tracing::error!(%error, %origin, "Skipping CORS origin that is not a valid header value");
                })
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_check() -> &'static str {
    "OK"
}
