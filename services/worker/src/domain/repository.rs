#![allow(async_fn_in_trait)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use inflow_core::error::StorageError;
use inflow_domain::{EventEnvelope, EventStatus};

/// Outcome of attempting to move an event into PROCESSING.
#[derive(Debug, Clone, PartialEq)]
pub enum BeginProcessing {
    /// The transition committed; the returned envelope carries the bumped
    /// attempt counter.
    Started(EventEnvelope),
    /// The event is already settled (succeeded, terminal, or parked for the
    /// retry scheduler) — a duplicate delivery that must be acknowledged
    /// without re-processing.
    AlreadySettled(EventStatus),
    /// No event row exists for this id.
    NotFound,
}

/// Port over the event table for the worker's lifecycle writes.
///
/// Every method commits a durable status write before returning; the caller
/// acknowledges the broker only after that commit.
pub trait EventStore: Send + Sync {
    /// QUEUED -> PROCESSING (or re-entry into PROCESSING after a reclaim),
    /// incrementing `attempts` and clearing the prior failure context.
    async fn begin_processing(&self, event_id: Uuid) -> Result<BeginProcessing, StorageError>;

    /// PROCESSING -> SUCCEEDED.
    async fn complete(&self, event_id: Uuid) -> Result<(), StorageError>;

    /// PROCESSING -> FAILED_RETRYABLE with a sanitized error and the schedule
    /// for the next attempt.
    async fn fail_retryable(
        &self,
        event_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// PROCESSING -> FAILED_TERMINAL.
    async fn fail_terminal(&self, event_id: Uuid, error: &str) -> Result<(), StorageError>;
}
