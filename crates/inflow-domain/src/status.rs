use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle position of an event envelope.
///
/// Transitions between statuses are restricted to the pairs listed in
/// [`EventStatus::can_transition_to`]; everything else is rejected before it
/// reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// Constructed during ingestion, not yet committed as queued.
    Received,
    /// Committed together with an outbox row; publication is guaranteed.
    Queued,
    /// A worker owns the event and is running its handler.
    Processing,
    /// Handler completed; terminal.
    Succeeded,
    /// Handler failed transiently; the retry scheduler will re-enqueue it.
    FailedRetryable,
    /// Handler failed permanently or the retry cap was exhausted; terminal.
    FailedTerminal,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::FailedRetryable => "FAILED_RETRYABLE",
            Self::FailedTerminal => "FAILED_TERMINAL",
        }
    }

    /// Whether `self -> to` is a permitted lifecycle transition.
    ///
    /// `Processing -> Processing` is allowed: a reclaimed entry re-enters
    /// processing after a worker died mid-handler. The stored status does not
    /// change, so no transition is observable from outside.
    pub fn can_transition_to(&self, to: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (*self, to),
            (Received, Queued)
                | (Queued, Processing)
                | (Processing, Processing)
                | (Processing, Succeeded)
                | (Processing, FailedRetryable)
                | (Processing, FailedTerminal)
                | (FailedRetryable, Queued)
        )
    }

    /// Whether the event has reached a state the worker must not re-process:
    /// either terminal, or parked for the retry scheduler.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedRetryable | Self::FailedTerminal
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown event status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for EventStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RECEIVED" => Ok(Self::Received),
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED_RETRYABLE" => Ok(Self::FailedRetryable),
            "FAILED_TERMINAL" => Ok(Self::FailedTerminal),
            other => Err(ParseStatusError(other.to_owned())),
        }
    }
}
