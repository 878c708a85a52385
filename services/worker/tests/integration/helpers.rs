use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use inflow_core::backoff::BackoffConfig;
use inflow_core::error::StorageError;
use inflow_domain::{EventEnvelope, EventStatus, RetryPolicy};
use inflow_worker::consumer::{Worker, WorkerSettings};
use inflow_worker::domain::broker::{
    AutoClaimPage, Broker, BrokerEntry, BrokerError, ReadPosition,
};
use inflow_worker::domain::handler::{EventHandler, HandlerError, HandlerRegistry, Phase};
use inflow_worker::domain::repository::{BeginProcessing, EventStore};

// ── InMemoryBroker ───────────────────────────────────────────────────────────

struct PendingInfo {
    consumer: String,
    idle: Duration,
}

struct BrokerState {
    next_seq: u64,
    entries: Vec<BrokerEntry>,
    group_exists: bool,
    delivered: usize,
    pending: HashMap<String, PendingInfo>,
    acked: Vec<String>,
    auto_claim_supported: bool,
    ensure_group_transient_failures: u32,
}

/// In-memory consumer-group broker: per-consumer pending entries with an idle
/// clock, auto-claim with a cursor, and the two-step claim fallback.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                next_seq: 0,
                entries: vec![],
                group_exists: false,
                delivered: 0,
                pending: HashMap::new(),
                acked: vec![],
                auto_claim_supported: true,
                ensure_group_transient_failures: 0,
            })),
        }
    }

    pub fn with_group() -> Self {
        let broker = Self::new();
        broker.state.lock().unwrap().group_exists = true;
        broker
    }

    /// Append an undelivered entry to the stream; returns its id.
    pub fn seed_entry(&self, fields: &[(&str, &str)]) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_seq += 1;
        let id = format!("{}-0", state.next_seq);
        state.entries.push(BrokerEntry {
            id: id.clone(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        });
        id
    }

    /// Append an entry already delivered to `consumer` and idle for `idle`.
    pub fn seed_pending(&self, consumer: &str, idle: Duration, fields: &[(&str, &str)]) -> String {
        let id = self.seed_entry(fields);
        let mut state = self.state.lock().unwrap();
        state.delivered = state.entries.len();
        state.pending.insert(
            id.clone(),
            PendingInfo {
                consumer: consumer.to_owned(),
                idle,
            },
        );
        id
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn disable_auto_claim(&self) {
        self.state.lock().unwrap().auto_claim_supported = false;
    }

    pub fn fail_ensure_group(&self, times: u32) {
        self.state.lock().unwrap().ensure_group_transient_failures = times;
    }

    pub fn group_exists(&self) -> bool {
        self.state.lock().unwrap().group_exists
    }
}

fn seq_of(id: &str) -> u64 {
    id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

impl Broker for InMemoryBroker {
    async fn ensure_group(&self, _stream: &str, _group: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        if state.ensure_group_transient_failures > 0 {
            state.ensure_group_transient_failures -= 1;
            return Err(BrokerError::Transient(anyhow!("connection refused")));
        }
        if state.group_exists {
            return Err(BrokerError::GroupAlreadyExists);
        }
        state.group_exists = true;
        Ok(())
    }

    async fn read(
        &self,
        _stream: &str,
        _group: &str,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        match position {
            ReadPosition::New => {
                let start = state.delivered;
                let end = (start + count).min(state.entries.len());
                let batch: Vec<BrokerEntry> = state.entries[start..end].to_vec();
                state.delivered = end;
                for entry in &batch {
                    state.pending.insert(
                        entry.id.clone(),
                        PendingInfo {
                            consumer: consumer.to_owned(),
                            idle: Duration::ZERO,
                        },
                    );
                }
                Ok(batch)
            }
            ReadPosition::OwnPending => Ok(state
                .entries
                .iter()
                .filter(|entry| {
                    state
                        .pending
                        .get(&entry.id)
                        .is_some_and(|p| p.consumer == consumer)
                })
                .take(count)
                .cloned()
                .collect()),
        }
    }

    async fn ack(&self, _stream: &str, _group: &str, entry_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.pending.remove(entry_id);
        state.acked.push(entry_id.to_owned());
        Ok(())
    }

    async fn auto_claim(
        &self,
        _stream: &str,
        _group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> Result<AutoClaimPage, BrokerError> {
        let mut state = self.state.lock().unwrap();
        if !state.auto_claim_supported {
            return Err(BrokerError::Unsupported);
        }
        let cursor_seq = seq_of(cursor);
        let mut eligible: Vec<String> = state
            .pending
            .iter()
            .filter(|(id, info)| info.idle >= min_idle && seq_of(id) >= cursor_seq)
            .map(|(id, _)| id.clone())
            .collect();
        eligible.sort_by_key(|id| seq_of(id));

        let taken: Vec<String> = eligible.iter().take(count).cloned().collect();
        for id in &taken {
            let info = state.pending.get_mut(id).unwrap();
            info.consumer = consumer.to_owned();
            info.idle = Duration::ZERO;
        }
        let next_cursor = eligible
            .get(taken.len())
            .cloned()
            .unwrap_or_else(|| "0-0".to_owned());
        let entries = state
            .entries
            .iter()
            .filter(|entry| taken.contains(&entry.id))
            .cloned()
            .collect();
        Ok(AutoClaimPage {
            next_cursor,
            entries,
        })
    }

    async fn pending_idle(
        &self,
        _stream: &str,
        _group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<String>, BrokerError> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, info)| info.idle >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by_key(|id| seq_of(id));
        ids.truncate(count);
        Ok(ids)
    }

    async fn claim(
        &self,
        _stream: &str,
        _group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        let mut claimed = vec![];
        for id in ids {
            let Some(info) = state.pending.get_mut(id) else {
                continue;
            };
            if info.idle < min_idle {
                continue;
            }
            info.consumer = consumer.to_owned();
            info.idle = Duration::ZERO;
            if let Some(entry) = state.entries.iter().find(|entry| &entry.id == id) {
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }
}

// ── InMemoryEventStore ───────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    events: HashMap<Uuid, EventEnvelope>,
    history: HashMap<Uuid, Vec<EventStatus>>,
    fail_begin: bool,
    fail_complete: bool,
}

/// In-memory event table enforcing the same domain transitions as the real
/// store, with a per-event status history for asserting observed sequences.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, envelope: EventEnvelope) {
        let mut state = self.state.lock().unwrap();
        state
            .history
            .insert(envelope.id, vec![envelope.status]);
        state.events.insert(envelope.id, envelope);
    }

    pub fn get(&self, id: Uuid) -> Option<EventEnvelope> {
        self.state.lock().unwrap().events.get(&id).cloned()
    }

    pub fn history(&self, id: Uuid) -> Vec<EventStatus> {
        self.state
            .lock()
            .unwrap()
            .history
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_begin_processing(&self) {
        self.state.lock().unwrap().fail_begin = true;
    }

    pub fn fail_complete(&self) {
        self.state.lock().unwrap().fail_complete = true;
    }

    fn persist(state: &mut StoreState, envelope: EventEnvelope) {
        state
            .history
            .entry(envelope.id)
            .or_default()
            .push(envelope.status);
        state.events.insert(envelope.id, envelope);
    }
}

impl EventStore for InMemoryEventStore {
    async fn begin_processing(&self, event_id: Uuid) -> Result<BeginProcessing, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_begin {
            return Err(StorageError::Transient(anyhow!("database unavailable")));
        }
        let Some(envelope) = state.events.get(&event_id).cloned() else {
            return Ok(BeginProcessing::NotFound);
        };
        if envelope.status.is_settled() {
            return Ok(BeginProcessing::AlreadySettled(envelope.status));
        }
        let mut envelope = envelope;
        envelope
            .begin_processing()
            .map_err(|e| StorageError::Other(anyhow!(e)))?;
        Self::persist(&mut state, envelope.clone());
        Ok(BeginProcessing::Started(envelope))
    }

    async fn complete(&self, event_id: Uuid) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_complete {
            return Err(StorageError::Transient(anyhow!("database unavailable")));
        }
        let mut envelope = state
            .events
            .get(&event_id)
            .cloned()
            .ok_or_else(|| StorageError::Other(anyhow!("event not found")))?;
        envelope
            .succeed()
            .map_err(|e| StorageError::Other(anyhow!(e)))?;
        Self::persist(&mut state, envelope);
        Ok(())
    }

    async fn fail_retryable(
        &self,
        event_id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let mut envelope = state
            .events
            .get(&event_id)
            .cloned()
            .ok_or_else(|| StorageError::Other(anyhow!("event not found")))?;
        envelope
            .fail_retryable(error, next_attempt_at)
            .map_err(|e| StorageError::Other(anyhow!(e)))?;
        Self::persist(&mut state, envelope);
        Ok(())
    }

    async fn fail_terminal(&self, event_id: Uuid, error: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        let mut envelope = state
            .events
            .get(&event_id)
            .cloned()
            .ok_or_else(|| StorageError::Other(anyhow!("event not found")))?;
        envelope
            .fail_terminal(error)
            .map_err(|e| StorageError::Other(anyhow!(e)))?;
        Self::persist(&mut state, envelope);
        Ok(())
    }
}

// ── Test handlers ────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    FailRetryable(&'static str),
    FailTerminal(&'static str),
}

pub struct TestHandler {
    behavior: Behavior,
    pub calls: Arc<Mutex<Vec<(Uuid, Phase)>>>,
}

impl TestHandler {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: Arc::new(Mutex::new(vec![])),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for TestHandler {
    async fn handle(&self, envelope: &EventEnvelope, phase: Phase) -> Result<(), HandlerError> {
        self.calls.lock().unwrap().push((envelope.id, phase));
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::FailRetryable(message) => Err(HandlerError::Retryable(message.to_owned())),
            Behavior::FailTerminal(message) => Err(HandlerError::Terminal(message.to_owned())),
        }
    }
}

/// Handler that never returns; used to observe cancellation mid-handler.
pub struct HangingHandler;

#[async_trait]
impl EventHandler for HangingHandler {
    async fn handle(&self, _envelope: &EventEnvelope, _phase: Phase) -> Result<(), HandlerError> {
        std::future::pending().await
    }
}

// ── Worker fixture ───────────────────────────────────────────────────────────

pub const CONSUMER: &str = "alive";

pub fn test_settings() -> WorkerSettings {
    WorkerSettings {
        stream: "inflow:events".to_owned(),
        group: "inflow-workers".to_owned(),
        consumer: CONSUMER.to_owned(),
        read_batch_size: 10,
        empty_read_delay: Duration::from_millis(10),
        error_delay: Duration::from_millis(10),
        claim_min_idle: Duration::from_secs(30),
        claim_batch_size: 10,
        reclaim_interval: Duration::from_secs(30),
        drain_max_batches: 10,
        drain_max_messages: 100,
        bootstrap: BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_attempts: 0,
        },
        retry_policy: RetryPolicy::default(),
    }
}

pub fn worker(
    broker: InMemoryBroker,
    store: InMemoryEventStore,
    handlers: HandlerRegistry,
) -> Worker<InMemoryBroker, InMemoryEventStore> {
    Worker {
        broker,
        store,
        handlers,
        settings: test_settings(),
    }
}

pub fn queued_envelope(event_type: &str) -> EventEnvelope {
    let now = Utc::now();
    EventEnvelope {
        id: Uuid::new_v4(),
        tenant_id: "t1".to_owned(),
        event_type: event_type.to_owned(),
        occurred_at: now,
        received_at: now,
        source: "crm".to_owned(),
        idempotency_key: None,
        correlation_id: Uuid::new_v4(),
        payload: serde_json::json!({"id": 1}),
        status: EventStatus::Queued,
        attempts: 0,
        next_attempt_at: None,
        last_error: None,
    }
}

/// Seed an undelivered broker entry referencing `envelope`, the way the
/// outbox publisher writes them.
pub fn seed_event_entry(broker: &InMemoryBroker, envelope: &EventEnvelope) -> String {
    let message = serde_json::to_value(envelope).unwrap().to_string();
    broker.seed_entry(&[
        ("event_id", &envelope.id.to_string()),
        ("tenant_id", &envelope.tenant_id),
        ("event_type", &envelope.event_type),
        ("correlation_id", &envelope.correlation_id.to_string()),
        ("message", &message),
    ])
}
