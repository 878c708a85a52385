use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use inflow_core::health::{healthz, readyz};
use inflow_core::middleware::request_id_layer;

use crate::handlers::events::{get_event, ingest_event};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Events
        .route("/events", post(ingest_event))
        .route("/events/{event_id}", get(get_event))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
