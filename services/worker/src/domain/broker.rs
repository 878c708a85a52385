#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

/// One stream entry as delivered by the broker: its assigned id plus a flat
/// field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl BrokerEntry {
    /// Resolve the referenced event id: the top-level `event_id` field if
    /// present and parseable, otherwise the `event_id` inside the embedded
    /// `message` JSON.
    pub fn event_id(&self) -> Option<Uuid> {
        if let Some(id) = self
            .fields
            .get("event_id")
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        {
            return Some(id);
        }
        let message = self.fields.get("message")?;
        let value: serde_json::Value = serde_json::from_str(message).ok()?;
        value
            .get("event_id")
            .or_else(|| value.get("id"))
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Broker failure classified at the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// XGROUP CREATE on an existing group; callers treat this as success.
    #[error("consumer group already exists")]
    GroupAlreadyExists,
    /// The broker does not know the requested command (e.g. XAUTOCLAIM on an
    /// old server); callers fall back to the two-step claim path.
    #[error("broker command not supported")]
    Unsupported,
    /// Connection loss, timeouts, broker-reported retryable states.
    #[error("transient broker failure: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("broker failure: {0}")]
    Other(#[source] anyhow::Error),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Where a group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPosition {
    /// Entries already delivered to this consumer but not yet acknowledged
    /// (read id "0").
    OwnPending,
    /// Entries never delivered to any consumer in the group (read id ">").
    New,
}

/// A page of auto-claimed entries plus the cursor for the next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoClaimPage {
    pub next_cursor: String,
    pub entries: Vec<BrokerEntry>,
}

/// Port over the log-structured stream broker's consumer-group surface.
pub trait Broker: Send + Sync {
    /// Create the consumer group at the stream tail, creating the stream if
    /// needed. An existing group surfaces as `GroupAlreadyExists`.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    /// Read up to `count` entries for `consumer` from the given position.
    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> Result<Vec<BrokerEntry>, BrokerError>;

    /// Acknowledge one entry for the group.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError>;

    /// Transfer ownership of entries idle at least `min_idle` to `consumer`,
    /// scanning from `cursor`.
    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> Result<AutoClaimPage, BrokerError>;

    /// Ids from the group's pending list idle at least `min_idle`. Fallback
    /// path for brokers without auto-claim.
    async fn pending_idle(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<String>, BrokerError>;

    /// Explicitly claim the given ids for `consumer`.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<BrokerEntry>, BrokerError>;
}
