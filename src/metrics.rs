//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Authentication Metrics
    pub static ref LOGIN_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessionauth_login_attempts_total", "Total number of login attempts"),
        &["method", "outcome"]
    ).expect("metric can be created");
    pub static ref TOKEN_REFRESH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessionauth_token_refresh_total", "Total number of access token refreshes"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DISCOVERY_FETCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessionauth_discovery_fetch_total", "Total number of OIDC discovery fetches"),
        &["outcome"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessionauth_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(LOGIN_ATTEMPTS_TOTAL.clone()))
        .expect("LOGIN_ATTEMPTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(TOKEN_REFRESH_TOTAL.clone()))
        .expect("TOKEN_REFRESH_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DISCOVERY_FETCH_TOTAL.clone()))
        .expect("DISCOVERY_FETCH_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
