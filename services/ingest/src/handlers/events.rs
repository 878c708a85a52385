use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use inflow_domain::EventStatus;

use crate::error::IngestServiceError;
use crate::state::AppState;
use crate::usecase::ingest::{IngestEventUseCase, IngestRequest};
use crate::usecase::lookup::GetEventUseCase;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ── POST /events ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct IngestEventRequest {
    pub event_id: Option<Uuid>,
    pub event_type: String,
    pub occurred_at: Option<chrono::DateTime<chrono::Utc>>,
    pub source: String,
    pub tenant_id: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct IngestEventResponse {
    pub event_id: Uuid,
    pub status: EventStatus,
    pub idempotency_replayed: bool,
}

pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IngestEventRequest>,
) -> Result<(StatusCode, Json<IngestEventResponse>), IngestServiceError> {
    let uc = IngestEventUseCase {
        events: state.event_repo(),
        allowed_event_types: state.allowed_event_types.clone(),
        stream_name: state.stream_name.clone(),
    };
    let outcome = uc
        .execute(IngestRequest {
            event_id: body.event_id,
            event_type: body.event_type,
            occurred_at: body.occurred_at,
            source: body.source,
            tenant_id: body.tenant_id,
            idempotency_key: body.idempotency_key,
            correlation_id: body.correlation_id,
            payload: body.payload,
            header_idempotency_key: header_value(&headers, IDEMPOTENCY_KEY_HEADER),
            header_correlation_id: header_value(&headers, CORRELATION_ID_HEADER),
        })
        .await?;

    let code = if outcome.idempotency_replayed {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        code,
        Json(IngestEventResponse {
            event_id: outcome.event_id,
            status: outcome.status,
            idempotency_replayed: outcome.idempotency_replayed,
        }),
    ))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

// ── GET /events/{event_id} ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventResponse {
    pub event_id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    #[serde(serialize_with = "inflow_core::serde::to_rfc3339_ms")]
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    #[serde(serialize_with = "inflow_core::serde::to_rfc3339_ms")]
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub source: String,
    pub correlation_id: Uuid,
    pub status: EventStatus,
    pub attempts: i32,
    #[serde(serialize_with = "inflow_core::serde::to_rfc3339_ms_opt")]
    pub next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventResponse>, IngestServiceError> {
    let uc = GetEventUseCase {
        events: state.event_repo(),
    };
    let envelope = uc.execute(event_id).await?;
    Ok(Json(EventResponse {
        event_id: envelope.id,
        tenant_id: envelope.tenant_id,
        event_type: envelope.event_type,
        occurred_at: envelope.occurred_at,
        received_at: envelope.received_at,
        source: envelope.source,
        correlation_id: envelope.correlation_id,
        status: envelope.status,
        attempts: envelope.attempts,
        next_attempt_at: envelope.next_attempt_at,
        last_error: envelope.last_error,
    }))
}
