use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use inflow_core::error::StorageError;
use inflow_domain::{EventEnvelope, EventStatus, OutboxMessage};

use crate::domain::repository::EventRepository;
use crate::error::IngestServiceError;

/// Raw admission request: body fields plus the transport headers that may
/// override them.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub event_id: Option<Uuid>,
    pub event_type: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub source: String,
    pub tenant_id: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub payload: Option<Value>,
    /// `Idempotency-Key` header; takes precedence over the body when non-blank.
    pub header_idempotency_key: Option<String>,
    /// `X-Correlation-Id` header; takes precedence when it parses as a
    /// non-nil UUID, otherwise the body value is used.
    pub header_correlation_id: Option<String>,
}

/// Normalized admission command after precedence and defaulting.
#[derive(Debug, Clone)]
pub struct IngestCommand {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub source: String,
    pub tenant_id: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Uuid,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub event_id: Uuid,
    pub status: EventStatus,
    pub idempotency_replayed: bool,
}

pub struct IngestEventUseCase<E>
where
    E: EventRepository,
{
    pub events: E,
    pub allowed_event_types: Arc<Vec<String>>,
    pub stream_name: String,
}

impl<E> IngestEventUseCase<E>
where
    E: EventRepository,
{
    pub async fn execute(
        &self,
        request: IngestRequest,
    ) -> Result<IngestOutcome, IngestServiceError> {
        let command = normalize(request);
        self.validate(&command)?;

        let mut envelope = EventEnvelope {
            id: command.event_id,
            tenant_id: command.tenant_id,
            event_type: command.event_type,
            occurred_at: command.occurred_at,
            received_at: command.received_at,
            source: command.source,
            idempotency_key: command.idempotency_key,
            correlation_id: command.correlation_id,
            payload: command.payload.unwrap_or(Value::Null),
            status: EventStatus::Received,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
        };
        // The persisted status is QUEUED from the start: the outbox row in
        // the same transaction guarantees publication.
        envelope.mark_queued().map_err(|e| anyhow!(e))?;

        let outbox = OutboxMessage::for_envelope(&envelope, &self.stream_name);
        match self
            .events
            .create_queued_with_outbox(&envelope, &outbox)
            .await
        {
            Ok(()) => Ok(IngestOutcome {
                event_id: envelope.id,
                status: envelope.status,
                idempotency_replayed: false,
            }),
            Err(StorageError::Conflict) => self.replay(&envelope).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Resolve a unique-constraint conflict into an idempotent replay, the
    /// RECEIVED repair path, or a 409.
    async fn replay(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<IngestOutcome, IngestServiceError> {
        // Without a key the conflict came from somewhere else (e.g. a reused
        // event id) and cannot be resolved as a replay.
        let Some(key) = envelope.idempotency_key.as_deref() else {
            return Err(IngestServiceError::Conflict);
        };
        let existing = self
            .events
            .find_by_idempotency_key(&envelope.tenant_id, key)
            .await?;
        let Some(existing) = existing else {
            return Err(IngestServiceError::Conflict);
        };

        if existing.status == EventStatus::Received {
            // The original ingestion died before committing its outbox row.
            let mut repaired = existing.clone();
            repaired.mark_queued().map_err(|e| anyhow!(e))?;
            let outbox = OutboxMessage::for_envelope(&repaired, &self.stream_name);
            match self
                .events
                .requeue_received_with_outbox(&repaired, &outbox)
                .await
            {
                // A concurrent replay may have repaired it first.
                Ok(()) | Err(StorageError::Conflict) => {}
                Err(err) => return Err(err.into()),
            }
            return Ok(IngestOutcome {
                event_id: existing.id,
                status: EventStatus::Queued,
                idempotency_replayed: true,
            });
        }

        Ok(IngestOutcome {
            event_id: existing.id,
            status: existing.status,
            idempotency_replayed: true,
        })
    }

    fn validate(&self, command: &IngestCommand) -> Result<(), IngestServiceError> {
        let mut errors = BTreeMap::new();
        if command.tenant_id.trim().is_empty() {
            errors.insert("tenant_id".to_owned(), "must not be blank".to_owned());
        }
        if command.source.trim().is_empty() {
            errors.insert("source".to_owned(), "must not be blank".to_owned());
        }
        if command.event_type.trim().is_empty() {
            errors.insert("event_type".to_owned(), "must not be blank".to_owned());
        } else if !self.allowed_event_types.is_empty()
            && !self.allowed_event_types.contains(&command.event_type)
        {
            errors.insert(
                "event_type".to_owned(),
                "is not a registered event type".to_owned(),
            );
        }
        if command.occurred_at > command.received_at {
            errors.insert("occurred_at".to_owned(), "must not be in the future".to_owned());
        }
        if command.payload.is_none() {
            errors.insert("payload".to_owned(), "is required".to_owned());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(IngestServiceError::Validation(errors))
        }
    }
}

/// Apply the precedence and defaulting rules of the admission contract.
pub fn normalize(request: IngestRequest) -> IngestCommand {
    let received_at = Utc::now();

    let idempotency_key =
        non_blank(request.header_idempotency_key).or_else(|| non_blank(request.idempotency_key));

    let correlation_id = request
        .header_correlation_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .filter(|id| !id.is_nil())
        .or_else(|| request.correlation_id.filter(|id| !id.is_nil()))
        .unwrap_or_else(Uuid::new_v4);

    let event_id = request
        .event_id
        .filter(|id| !id.is_nil())
        .unwrap_or_else(Uuid::new_v4);

    IngestCommand {
        event_id,
        event_type: request.event_type,
        occurred_at: request.occurred_at.unwrap_or(received_at),
        received_at,
        source: request.source,
        tenant_id: request.tenant_id,
        idempotency_key,
        correlation_id,
        payload: request.payload,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
