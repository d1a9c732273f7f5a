//! API layer
//!
//! HTTP handlers for:
//! - Authentication (password and federated login, logout, current user)
//! - Metrics (Prometheus)

mod auth;
pub mod metrics;

pub use auth::auth_router;
pub use metrics::metrics_router;
