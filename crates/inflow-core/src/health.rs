use axum::http::StatusCode;

/// `GET /healthz` — liveness. Mounted by both the ingest router and the
/// worker's health-only router.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// `GET /readyz` — readiness. Process-level only: the background loops keep
/// retrying a lost database or broker on their own, so deep dependency
/// probes are left to the deployment.
pub async fn readyz() -> StatusCode {
    StatusCode::OK
}
