use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::envelope::EventEnvelope;

/// A durable publish intent, written in the same transaction as its event.
///
/// `payload` is the full envelope snapshot at admission time; the publisher
/// relays it to the broker verbatim. `published_at` stays null until the
/// broker has accepted the write, after which the row is terminal and
/// eligible for pruning.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub event_id: Uuid,
    pub stream_name: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    /// Build the outbox row for an envelope bound for `stream_name`.
    pub fn for_envelope(envelope: &EventEnvelope, stream_name: &str) -> Self {
        let snapshot =
            serde_json::to_value(envelope).expect("event envelope serializes to JSON");
        Self {
            id: Uuid::new_v4(),
            event_id: envelope.id,
            stream_name: stream_name.to_owned(),
            payload: snapshot,
            created_at: Utc::now(),
            published_at: None,
            publish_attempts: 0,
            last_error: None,
        }
    }

    /// The field map written to the broker stream: `event_id`, `tenant_id`,
    /// `event_type`, `correlation_id` for routing, and `message` carrying the
    /// whole snapshot as a JSON string.
    pub fn stream_fields(&self) -> Vec<(&'static str, String)> {
        let text = |key: &str| {
            self.payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        vec![
            ("event_id", self.event_id.to_string()),
            ("tenant_id", text("tenant_id")),
            ("event_type", text("event_type")),
            ("correlation_id", text("correlation_id")),
            ("message", self.payload.to_string()),
        ]
    }
}
