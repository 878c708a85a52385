use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait,
};
use uuid::Uuid;

use inflow_core::error::StorageError;
use inflow_domain::envelope::TransitionError;
use inflow_domain::{EventEnvelope, EventStatus};
use inflow_schema::events;

use crate::domain::repository::{BeginProcessing, EventStore};

/// sea-orm adapter for the worker's lifecycle writes.
///
/// Each mutation is a fetch, a domain transition (which rejects anything the
/// state machine forbids), and a single update against the primary key.
#[derive(Clone)]
pub struct SeaOrmEventStore {
    pub db: DatabaseConnection,
}

impl EventStore for SeaOrmEventStore {
    async fn begin_processing(&self, event_id: Uuid) -> Result<BeginProcessing, StorageError> {
        let Some(model) = events::Entity::find_by_id(event_id).one(&self.db).await? else {
            return Ok(BeginProcessing::NotFound);
        };
        let mut envelope = envelope_from_model(model)?;
        if envelope.status.is_settled() {
            return Ok(BeginProcessing::AlreadySettled(envelope.status));
        }
        envelope
            .begin_processing()
            .map_err(|e| StorageError::Other(anyhow!("event {event_id}: {e}")))?;
        persist_lifecycle(&self.db, &envelope).await?;
        Ok(BeginProcessing::Started(envelope))
    }

    async fn complete(&self, event_id: Uuid) -> Result<(), StorageError> {
        self.apply(event_id, |envelope| envelope.succeed()).await
    }

    async fn fail_retryable(
        &self,
        event_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.apply(event_id, |envelope| {
            envelope.fail_retryable(error, next_attempt_at)
        })
        .await
    }

    async fn fail_terminal(&self, event_id: Uuid, error: &str) -> Result<(), StorageError> {
        self.apply(event_id, |envelope| envelope.fail_terminal(error))
            .await
    }
}

impl SeaOrmEventStore {
    async fn apply<F>(&self, event_id: Uuid, transition: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut EventEnvelope) -> Result<(), TransitionError>,
    {
        let Some(model) = events::Entity::find_by_id(event_id).one(&self.db).await? else {
            return Err(StorageError::Other(anyhow!("event {event_id} not found")));
        };
        let mut envelope = envelope_from_model(model)?;
        transition(&mut envelope)
            .map_err(|e| StorageError::Other(anyhow!("event {event_id}: {e}")))?;
        persist_lifecycle(&self.db, &envelope).await
    }
}

async fn persist_lifecycle(
    db: &DatabaseConnection,
    envelope: &EventEnvelope,
) -> Result<(), StorageError> {
    events::ActiveModel {
        id: Set(envelope.id),
        status: Set(envelope.status.as_str().to_owned()),
        attempts: Set(envelope.attempts),
        next_attempt_at: Set(envelope.next_attempt_at),
        last_error: Set(envelope.last_error.clone()),
        ..Default::default()
    }
    .update(db)
    .await?;
    Ok(())
}

fn envelope_from_model(model: events::Model) -> Result<EventEnvelope, StorageError> {
    let status: EventStatus = model
        .status
        .parse()
        .map_err(|e| StorageError::Other(anyhow!("event {}: {e}", model.id)))?;
    Ok(EventEnvelope {
        id: model.id,
        tenant_id: model.tenant_id,
        event_type: model.event_type,
        occurred_at: model.occurred_at,
        received_at: model.received_at,
        source: model.source,
        idempotency_key: model.idempotency_key,
        correlation_id: model.correlation_id,
        payload: model.payload,
        status,
        attempts: model.attempts,
        next_attempt_at: model.next_attempt_at,
        last_error: model.last_error,
    })
}
