use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionError, TransactionTrait,
    sea_query::Expr,
};
use uuid::Uuid;

use inflow_core::error::StorageError;
use inflow_domain::{EventEnvelope, EventStatus, OutboxMessage};
use inflow_schema::{events, outbox_messages};

use crate::domain::repository::{EventRepository, OutboxRepository, RetryRepository};

fn from_txn(err: TransactionError<sea_orm::DbErr>) -> StorageError {
    match err {
        TransactionError::Connection(e) | TransactionError::Transaction(e) => {
            StorageError::from_db(e)
        }
    }
}

// ── Event repository ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbEventRepository {
    pub db: DatabaseConnection,
}

impl EventRepository for DbEventRepository {
    async fn create_queued_with_outbox(
        &self,
        envelope: &EventEnvelope,
        outbox: &OutboxMessage,
    ) -> Result<(), StorageError> {
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                let envelope = envelope.clone();
                let outbox = outbox.clone();
                Box::pin(async move {
                    insert_event(txn, &envelope).await?;
                    insert_outbox_message(txn, &outbox).await?;
                    Ok(())
                })
            })
            .await
            .map_err(from_txn)
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<EventEnvelope>, StorageError> {
        let model = events::Entity::find()
            .filter(events::Column::TenantId.eq(tenant_id))
            .filter(events::Column::IdempotencyKey.eq(key))
            .one(&self.db)
            .await?;
        model.map(envelope_from_model).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EventEnvelope>, StorageError> {
        let model = events::Entity::find_by_id(id).one(&self.db).await?;
        model.map(envelope_from_model).transpose()
    }

    async fn requeue_received_with_outbox(
        &self,
        envelope: &EventEnvelope,
        outbox: &OutboxMessage,
    ) -> Result<(), StorageError> {
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                let envelope = envelope.clone();
                let outbox = outbox.clone();
                Box::pin(async move {
                    events::ActiveModel {
                        id: Set(envelope.id),
                        status: Set(envelope.status.as_str().to_owned()),
                        next_attempt_at: Set(envelope.next_attempt_at),
                        ..Default::default()
                    }
                    .update(txn)
                    .await?;
                    insert_outbox_message(txn, &outbox).await?;
                    Ok(())
                })
            })
            .await
            .map_err(from_txn)
    }
}

async fn insert_event(
    txn: &DatabaseTransaction,
    envelope: &EventEnvelope,
) -> Result<(), sea_orm::DbErr> {
    events::ActiveModel {
        id: Set(envelope.id),
        tenant_id: Set(envelope.tenant_id.clone()),
        event_type: Set(envelope.event_type.clone()),
        occurred_at: Set(envelope.occurred_at),
        received_at: Set(envelope.received_at),
        source: Set(envelope.source.clone()),
        idempotency_key: Set(envelope.idempotency_key.clone()),
        correlation_id: Set(envelope.correlation_id),
        payload: Set(envelope.payload.clone()),
        status: Set(envelope.status.as_str().to_owned()),
        attempts: Set(envelope.attempts),
        next_attempt_at: Set(envelope.next_attempt_at),
        last_error: Set(envelope.last_error.clone()),
    }
    .insert(txn)
    .await?;
    Ok(())
}

async fn insert_outbox_message(
    txn: &DatabaseTransaction,
    outbox: &OutboxMessage,
) -> Result<(), sea_orm::DbErr> {
    outbox_messages::ActiveModel {
        id: Set(outbox.id),
        event_id: Set(outbox.event_id),
        stream_name: Set(outbox.stream_name.clone()),
        payload: Set(outbox.payload.clone()),
        created_at: Set(outbox.created_at),
        published_at: Set(outbox.published_at),
        publish_attempts: Set(outbox.publish_attempts),
        last_error: Set(outbox.last_error.clone()),
    }
    .insert(txn)
    .await?;
    Ok(())
}

pub(crate) fn envelope_from_model(model: events::Model) -> Result<EventEnvelope, StorageError> {
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

fn outbox_from_model(model: outbox_messages::Model) -> OutboxMessage {
    OutboxMessage {
        id: model.id,
        event_id: model.event_id,
        stream_name: model.stream_name,
        payload: model.payload,
        created_at: model.created_at,
        published_at: model.published_at,
        publish_attempts: model.publish_attempts,
        last_error: model.last_error,
    }
}

// ── Outbox repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
}

impl OutboxRepository for DbOutboxRepository {
    async fn load_unpublished(&self, limit: u64) -> Result<Vec<OutboxMessage>, StorageError> {
        let models = outbox_messages::Entity::find()
            .filter(outbox_messages::Column::PublishedAt.is_null())
            .order_by_asc(outbox_messages::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(outbox_from_model).collect())
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StorageError> {
        outbox_messages::ActiveModel {
            id: Set(id),
            published_at: Set(Some(Utc::now())),
            last_error: Set(None),
            ..Default::default()
        }
        .update(&self.db)
        .await?;
        Ok(())
    }

    async fn record_publish_failure(&self, id: Uuid, error: &str) -> Result<(), StorageError> {
        outbox_messages::Entity::update_many()
            .col_expr(
                outbox_messages::Column::PublishAttempts,
                Expr::col(outbox_messages::Column::PublishAttempts).add(1),
            )
            .col_expr(
                outbox_messages::Column::LastError,
                Expr::value(Some(error.to_owned())),
            )
            .filter(outbox_messages::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn prune_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = outbox_messages::Entity::delete_many()
            .filter(outbox_messages::Column::PublishedAt.is_not_null())
            .filter(outbox_messages::Column::PublishedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

// ── Retry repository ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbRetryRepository {
    pub db: DatabaseConnection,
}

impl RetryRepository for DbRetryRepository {
    async fn load_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<EventEnvelope>, StorageError> {
        let models = events::Entity::find()
            .filter(events::Column::Status.eq(EventStatus::FailedRetryable.as_str()))
            .filter(events::Column::NextAttemptAt.lte(now))
            .order_by_asc(events::Column::NextAttemptAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        models.into_iter().map(envelope_from_model).collect()
    }

    async fn requeue_with_outbox(
        &self,
        envelope: &EventEnvelope,
        outbox: &OutboxMessage,
    ) -> Result<(), StorageError> {
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                let envelope = envelope.clone();
                let outbox = outbox.clone();
                Box::pin(async move {
                    events::ActiveModel {
                        id: Set(envelope.id),
                        status: Set(envelope.status.as_str().to_owned()),
                        next_attempt_at: Set(envelope.next_attempt_at),
                        ..Default::default()
                    }
                    .update(txn)
                    .await?;
                    insert_outbox_message(txn, &outbox).await?;
                    Ok(())
                })
            })
            .await
            .map_err(from_txn)
    }
}
