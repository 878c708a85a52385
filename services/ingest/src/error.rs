use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use inflow_core::error::StorageError;

/// Ingestion service error variants mapped to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum IngestServiceError {
    #[error("validation failed")]
    Validation(BTreeMap<String, String>),
    #[error("idempotency conflict")]
    Conflict,
    #[error("event not found")]
    NotFound,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IngestServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<StorageError> for IngestServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => Self::Conflict,
            StorageError::Transient(e) | StorageError::Other(e) => Self::Internal(e),
        }
    }
}

impl IntoResponse for IngestServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Log 500s only — tower-http TraceLayer already records method/uri/
        // status for all requests, and 4xx are expected client outcomes.
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }
        let body = match &self {
            Self::Validation(errors) => serde_json::json!({
                "kind": self.kind(),
                "message": self.to_string(),
                "errors": errors,
            }),
            _ => serde_json::json!({
                "kind": self.kind(),
                "message": self.to_string(),
            }),
        };
        (status, axum::Json(body)).into_response()
    }
}
