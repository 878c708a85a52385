#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use inflow_core::error::StorageError;
use inflow_domain::{EventEnvelope, OutboxMessage};

/// Repository for the admission path of the events table.
pub trait EventRepository: Send + Sync {
    /// Insert the envelope and its outbox row in one transaction. The
    /// committed row is QUEUED: publication is guaranteed by the outbox.
    async fn create_queued_with_outbox(
        &self,
        envelope: &EventEnvelope,
        outbox: &OutboxMessage,
    ) -> Result<(), StorageError>;

    /// Look up a prior submission by its idempotency pair.
    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<EventEnvelope>, StorageError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<EventEnvelope>, StorageError>;

    /// Repair path: promote a stray RECEIVED row to QUEUED and insert the
    /// outbox row its original ingestion never committed, atomically.
    async fn requeue_received_with_outbox(
        &self,
        envelope: &EventEnvelope,
        outbox: &OutboxMessage,
    ) -> Result<(), StorageError>;
}

/// Repository for the publisher's view of the outbox table.
pub trait OutboxRepository: Send + Sync {
    /// Unpublished rows, oldest first.
    async fn load_unpublished(&self, limit: u64) -> Result<Vec<OutboxMessage>, StorageError>;

    /// Record broker acceptance; the row becomes terminal.
    async fn mark_published(&self, id: Uuid) -> Result<(), StorageError>;

    /// Bump the attempt counter and store the failure; the row stays eligible.
    async fn record_publish_failure(&self, id: Uuid, error: &str) -> Result<(), StorageError>;

    /// Delete rows published before `cutoff`. Returns the count removed.
    async fn prune_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Repository for the retry scheduler.
pub trait RetryRepository: Send + Sync {
    /// FAILED_RETRYABLE events whose next_attempt_at has passed, oldest first.
    async fn load_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<EventEnvelope>, StorageError>;

    /// Persist the already-requeued envelope and insert a fresh outbox row in
    /// one transaction.
    async fn requeue_with_outbox(
        &self,
        envelope: &EventEnvelope,
        outbox: &OutboxMessage,
    ) -> Result<(), StorageError>;
}

/// Port for appending entries to a broker stream.
pub trait StreamPublisher: Send + Sync {
    /// Append a field map to `stream`; returns the broker-assigned entry id.
    async fn publish(
        &self,
        stream: &str,
        fields: &[(&'static str, String)],
    ) -> Result<String, anyhow::Error>;
}
