//! Prometheus metrics endpoint

use axum::{
    Router,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

/// GET /metrics
async fn scrape() -> Result<Response, AppError> {
    let encoder = TextEncoder::new();
    let text = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::internal("Failed to encode metrics", e))?;

    Ok(([(CONTENT_TYPE, encoder.format_type().to_string())], text).into_response())
}

/// Router exposing `/metrics`; it carries no state so it can merge anywhere.
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(scrape))
}
