use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::EventStatus;

/// Cap on stored error strings. Driver messages can embed whole statements;
/// everything past this is noise in a status column.
const MAX_ERROR_LEN: usize = 500;

/// The full event record as stored: metadata plus the opaque payload.
///
/// The payload is never reshaped — it is carried as the exact JSON value the
/// producer submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub source: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Uuid,
    pub payload: Value,
    pub status: EventStatus,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A lifecycle transition rejected by the state machine. Never persisted.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("transition {from} -> {to} is not permitted")]
    Forbidden {
        from: EventStatus,
        to: EventStatus,
    },
    #[error("next_attempt_at must be in the future")]
    NextAttemptNotInFuture,
}

impl EventEnvelope {
    /// Structural invariants every persisted envelope must satisfy.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.occurred_at > self.received_at {
            return Err(InvariantViolation::OccurredAfterReceived);
        }
        if self.attempts < 0 {
            return Err(InvariantViolation::NegativeAttempts);
        }
        let retryable = self.status == EventStatus::FailedRetryable;
        if retryable != self.next_attempt_at.is_some() {
            return Err(InvariantViolation::NextAttemptMismatch);
        }
        if let Some(next) = self.next_attempt_at {
            if next < self.received_at {
                return Err(InvariantViolation::NextAttemptBeforeReceived);
            }
        }
        if self.status == EventStatus::Succeeded && self.last_error.is_some() {
            return Err(InvariantViolation::SucceededWithError);
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(InvariantViolation::BlankIdempotencyKey);
            }
        }
        Ok(())
    }

    /// RECEIVED -> QUEUED, on ingestion commit (or the repair path for a
    /// stray RECEIVED row).
    pub fn mark_queued(&mut self) -> Result<(), TransitionError> {
        self.transition_to(EventStatus::Queued)?;
        self.next_attempt_at = None;
        Ok(())
    }

    /// Enter PROCESSING: bumps the attempt counter and clears the previous
    /// failure context. Permitted from QUEUED and, for reclaimed entries whose
    /// worker died mid-handler, from PROCESSING itself.
    pub fn begin_processing(&mut self) -> Result<(), TransitionError> {
        self.transition_to(EventStatus::Processing)?;
        self.attempts += 1;
        self.last_error = None;
        self.next_attempt_at = None;
        Ok(())
    }

    /// PROCESSING -> SUCCEEDED.
    pub fn succeed(&mut self) -> Result<(), TransitionError> {
        self.transition_to(EventStatus::Succeeded)?;
        self.last_error = None;
        self.next_attempt_at = None;
        Ok(())
    }

    /// PROCESSING -> FAILED_RETRYABLE. Stores a sanitized error and the
    /// schedule for the next attempt, which must lie strictly in the future.
    pub fn fail_retryable(
        &mut self,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if next_attempt_at <= Utc::now() {
            return Err(TransitionError::NextAttemptNotInFuture);
        }
        self.transition_to(EventStatus::FailedRetryable)?;
        self.last_error = Some(sanitize_error(error));
        self.next_attempt_at = Some(next_attempt_at);
        Ok(())
    }

    /// PROCESSING -> FAILED_TERMINAL.
    pub fn fail_terminal(&mut self, error: &str) -> Result<(), TransitionError> {
        self.transition_to(EventStatus::FailedTerminal)?;
        self.last_error = Some(sanitize_error(error));
        self.next_attempt_at = None;
        Ok(())
    }

    /// FAILED_RETRYABLE -> QUEUED, by the retry scheduler.
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        if self.status != EventStatus::FailedRetryable {
            return Err(TransitionError::Forbidden {
                from: self.status,
                to: EventStatus::Queued,
            });
        }
        self.status = EventStatus::Queued;
        self.next_attempt_at = None;
        Ok(())
    }

    fn transition_to(&mut self, to: EventStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Forbidden {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// A structural invariant an envelope failed to satisfy.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("occurred_at is later than received_at")]
    OccurredAfterReceived,
    #[error("attempts is negative")]
    NegativeAttempts,
    #[error("next_attempt_at must be set iff status is FAILED_RETRYABLE")]
    NextAttemptMismatch,
    #[error("next_attempt_at is earlier than received_at")]
    NextAttemptBeforeReceived,
    #[error("a SUCCEEDED event must not carry last_error")]
    SucceededWithError,
    #[error("idempotency_key must not be blank when present")]
    BlankIdempotencyKey,
}

/// Trim and bound an error message for storage; blank input becomes
/// "Unknown error".
pub fn sanitize_error(error: &str) -> String {
    let trimmed = error.trim();
    if trimmed.is_empty() {
        return "Unknown error".to_owned();
    }
    trimmed.chars().take(MAX_ERROR_LEN).collect()
}
