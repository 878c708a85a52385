use axum::{Router, routing::get};

use inflow_core::health::{healthz, readyz};

/// The worker's HTTP surface is health-only; it runs beside the consumer loop.
pub fn build_router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
