use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use inflow_core::backoff::{BackoffConfig, RetryError, retry_with_backoff};
use inflow_domain::RetryPolicy;
use inflow_domain::envelope::sanitize_error;

use crate::config::WorkerConfig;
use crate::domain::broker::{Broker, BrokerEntry, BrokerError, ReadPosition};
use crate::domain::handler::{HandlerError, HandlerRegistry, Phase};
use crate::domain::repository::{BeginProcessing, EventStore};
use crate::error::WorkerError;

/// One reclaim pass advances the auto-claim cursor at most this many batches,
/// so a large orphan backlog cannot starve the read loop.
const MAX_CLAIM_BATCHES_PER_PASS: usize = 10;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    pub read_batch_size: usize,
    pub empty_read_delay: Duration,
    pub error_delay: Duration,
    pub claim_min_idle: Duration,
    pub claim_batch_size: usize,
    pub reclaim_interval: Duration,
    pub drain_max_batches: usize,
    pub drain_max_messages: usize,
    pub bootstrap: BackoffConfig,
    pub retry_policy: RetryPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            stream: config.worker_stream_name.clone(),
            group: config.worker_group_name.clone(),
            consumer: config.worker_consumer_name.clone(),
            read_batch_size: config.worker_read_batch_size,
            empty_read_delay: Duration::from_millis(config.worker_empty_read_delay_ms),
            error_delay: Duration::from_millis(config.worker_error_delay_ms),
            claim_min_idle: Duration::from_millis(config.worker_claim_min_idle_ms),
            claim_batch_size: config.worker_claim_batch_size,
            reclaim_interval: Duration::from_millis(config.worker_reclaim_interval_ms),
            drain_max_batches: config.worker_drain_on_startup_max_batches,
            drain_max_messages: config.worker_drain_on_startup_max_messages,
            bootstrap: config.bootstrap_backoff(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// What became of one broker entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// A durable status write committed and the entry was acknowledged.
    Acked,
    /// The entry stays pending; reclaim will revisit it.
    Skipped,
}

/// Consumer-group worker: drains its own pending entries on startup, reclaims
/// orphans from dead peers, reads new entries, and drives each referenced
/// event through its lifecycle.
///
/// The one invariant everything here serves: an entry is acknowledged only
/// after the status write reflecting its outcome has committed.
pub struct Worker<B, S>
where
    B: Broker,
    S: EventStore,
{
    pub broker: B,
    pub store: S,
    pub handlers: HandlerRegistry,
    pub settings: WorkerSettings,
}

impl<B, S> Worker<B, S>
where
    B: Broker,
    S: EventStore,
{
    /// Run until cancelled. The startup block (bootstrap, drain, reclaim
    /// sweeps) is retried as a whole until it completes once; after that the
    /// steady-state loop never exits except on cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        loop {
            match self.startup(&cancel).await {
                Ok(()) => break,
                Err(err) if err.is_cancelled() => return Ok(()),
                Err(err) => {
                    error!(error = %err, "worker startup failed; retrying");
                    if self.pause(self.settings.error_delay, &cancel).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        self.steady_state(&cancel).await
    }

    async fn startup(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        self.bootstrap(cancel).await?;
        let drained = self.drain_own_pending(cancel).await?;
        if drained > 0 {
            info!(drained, "startup drain complete");
        }
        for _ in 0..self.settings.drain_max_batches {
            if self.reclaim_pass(cancel).await? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Create the consumer group at the stream tail, retrying transient
    /// broker failures with exponential backoff. An existing group is
    /// success; non-transient errors fail fast.
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        let settings = &self.settings;
        let result = retry_with_backoff(
            &settings.bootstrap,
            cancel,
            BrokerError::is_transient,
            |attempt, delay, err: &BrokerError| {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "consumer group creation failed; backing off"
                );
            },
            || async {
                match self
                    .broker
                    .ensure_group(&settings.stream, &settings.group)
                    .await
                {
                    Ok(()) | Err(BrokerError::GroupAlreadyExists) => Ok(()),
                    Err(err) => Err(err),
                }
            },
        )
        .await;
        match result {
            Ok(()) => {
                info!(
                    stream = %settings.stream,
                    group = %settings.group,
                    "consumer group ready"
                );
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(WorkerError::Cancelled),
            Err(RetryError::Operation(err)) => Err(err.into()),
        }
    }

    /// Process entries a previous incarnation of this consumer left pending
    /// (read id "0"), bounded by the configured batch and message caps.
    pub async fn drain_own_pending(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, WorkerError> {
        let settings = &self.settings;
        let mut drained = 0usize;
        for _ in 0..settings.drain_max_batches {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            if drained >= settings.drain_max_messages {
                break;
            }
            let count = settings
                .read_batch_size
                .min(settings.drain_max_messages - drained);
            let batch = self
                .broker
                .read(
                    &settings.stream,
                    &settings.group,
                    &settings.consumer,
                    ReadPosition::OwnPending,
                    count,
                )
                .await?;
            if batch.is_empty() {
                break;
            }
            let mut acked = 0usize;
            for entry in &batch {
                drained += 1;
                if self.process_entry(entry, Phase::StartupDrain, cancel).await?
                    == EntryOutcome::Acked
                {
                    acked += 1;
                }
            }
            // Skipped entries stay pending and would come straight back on
            // the next "0" read; stop once a batch makes no progress.
            if acked == 0 {
                break;
            }
        }
        Ok(drained)
    }

    /// One reclaim pass: sweep ownership of entries idle beyond the claim
    /// threshold to this consumer and process them. Prefers the broker's
    /// auto-claim cursor; falls back to pending-list + explicit claim when
    /// the broker does not know the command.
    pub async fn reclaim_pass(&self, cancel: &CancellationToken) -> Result<usize, WorkerError> {
        let settings = &self.settings;
        let mut processed = 0usize;
        let mut cursor = "0-0".to_owned();
        for _ in 0..MAX_CLAIM_BATCHES_PER_PASS {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            match self
                .broker
                .auto_claim(
                    &settings.stream,
                    &settings.group,
                    &settings.consumer,
                    settings.claim_min_idle,
                    &cursor,
                    settings.claim_batch_size,
                )
                .await
            {
                Ok(page) => {
                    for entry in &page.entries {
                        self.process_entry(entry, Phase::ReclaimAuto, cancel).await?;
                        processed += 1;
                    }
                    let stalled = page.next_cursor.is_empty()
                        || page.next_cursor == "0-0"
                        || page.next_cursor == cursor;
                    if stalled {
                        break;
                    }
                    cursor = page.next_cursor;
                }
                Err(BrokerError::Unsupported) => {
                    debug!("auto-claim unsupported; falling back to pending list");
                    return self.reclaim_fallback(cancel).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(processed)
    }

    async fn reclaim_fallback(&self, cancel: &CancellationToken) -> Result<usize, WorkerError> {
        let settings = &self.settings;
        let ids = self
            .broker
            .pending_idle(
                &settings.stream,
                &settings.group,
                settings.claim_min_idle,
                settings.claim_batch_size,
            )
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let entries = self
            .broker
            .claim(
                &settings.stream,
                &settings.group,
                &settings.consumer,
                settings.claim_min_idle,
                &ids,
            )
            .await?;
        let mut processed = 0usize;
        for entry in &entries {
            self.process_entry(entry, Phase::ReclaimManual, cancel).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// One steady-state read of new entries; returns how many were delivered.
    pub async fn read_and_process(&self, cancel: &CancellationToken) -> Result<usize, WorkerError> {
        let settings = &self.settings;
        let batch = self
            .broker
            .read(
                &settings.stream,
                &settings.group,
                &settings.consumer,
                ReadPosition::New,
                settings.read_batch_size,
            )
            .await?;
        let delivered = batch.len();
        for entry in &batch {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            self.process_entry(entry, Phase::Live, cancel).await?;
        }
        Ok(delivered)
    }

    async fn steady_state(&self, cancel: &CancellationToken) -> Result<(), WorkerError> {
        info!(consumer = %self.settings.consumer, "worker entering steady state");
        let mut last_reclaim = tokio::time::Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if last_reclaim.elapsed() >= self.settings.reclaim_interval {
                match self.reclaim_pass(cancel).await {
                    Ok(reclaimed) => {
                        if reclaimed > 0 {
                            info!(reclaimed, "reclaimed orphaned entries");
                        }
                        last_reclaim = tokio::time::Instant::now();
                    }
                    Err(err) if err.is_cancelled() => return Ok(()),
                    Err(err) => {
                        error!(error = %err, "reclaim failed");
                        if self.pause(self.settings.error_delay, cancel).await.is_err() {
                            return Ok(());
                        }
                        continue;
                    }
                }
            }
            match self.read_and_process(cancel).await {
                Ok(0) => {
                    if self
                        .pause(self.settings.empty_read_delay, cancel)
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(err) if err.is_cancelled() => return Ok(()),
                Err(err) => {
                    error!(error = %err, "worker loop error");
                    if self.pause(self.settings.error_delay, cancel).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Drive one broker entry through the lifecycle.
    ///
    /// The acknowledgement discipline: ack happens only after a status write
    /// reflecting the outcome has committed. Every skip leaves the entry
    /// pending for reclaim.
    pub async fn process_entry(
        &self,
        entry: &BrokerEntry,
        phase: Phase,
        cancel: &CancellationToken,
    ) -> Result<EntryOutcome, WorkerError> {
        let Some(event_id) = entry.event_id() else {
            warn!(
                entry_id = %entry.id,
                phase = phase.as_str(),
                "entry without resolvable event_id; leaving pending"
            );
            return Ok(EntryOutcome::Skipped);
        };

        let envelope = match self.store.begin_processing(event_id).await {
            Ok(BeginProcessing::Started(envelope)) => envelope,
            Ok(BeginProcessing::AlreadySettled(status)) => {
                // At-least-once duplicate of an event that already finished;
                // acknowledging without re-processing is the idempotent skip.
                debug!(
                    event_id = %event_id,
                    entry_id = %entry.id,
                    status = %status,
                    "duplicate delivery of settled event; acknowledging"
                );
                self.ack(entry).await?;
                return Ok(EntryOutcome::Acked);
            }
            Ok(BeginProcessing::NotFound) => {
                warn!(
                    event_id = %event_id,
                    entry_id = %entry.id,
                    "no event row for entry; leaving pending"
                );
                return Ok(EntryOutcome::Skipped);
            }
            Err(err) => {
                warn!(
                    event_id = %event_id,
                    entry_id = %entry.id,
                    error = %err,
                    "failed to enter processing; leaving pending"
                );
                return Ok(EntryOutcome::Skipped);
            }
        };

        // Cancellation mid-handler is re-raised without acknowledging; the
        // entry stays pending for the next incarnation.
        let handled = tokio::select! {
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            result = self.invoke_handler(&envelope, phase) => result,
        };

        match handled {
            Ok(()) => {
                if let Err(err) = self.store.complete(event_id).await {
                    warn!(
                        event_id = %event_id,
                        error = %err,
                        "handler succeeded but status write failed; leaving pending"
                    );
                    return Ok(EntryOutcome::Skipped);
                }
                self.ack(entry).await?;
                info!(
                    event_id = %event_id,
                    correlation_id = %envelope.correlation_id,
                    phase = phase.as_str(),
                    attempts = envelope.attempts,
                    "event processed"
                );
                Ok(EntryOutcome::Acked)
            }
            Err(HandlerError::Terminal(message)) => {
                self.settle_terminal(entry, &envelope, &message).await
            }
            Err(HandlerError::Retryable(message)) => {
                if self.settings.retry_policy.is_exhausted(envelope.attempts) {
                    let message = format!(
                        "{message} (retry budget exhausted after {} attempts)",
                        envelope.attempts
                    );
                    self.settle_terminal(entry, &envelope, &message).await
                } else {
                    self.settle_retryable(entry, &envelope, &message).await
                }
            }
        }
    }

    async fn invoke_handler(
        &self,
        envelope: &inflow_domain::EventEnvelope,
        phase: Phase,
    ) -> Result<(), HandlerError> {
        match self.handlers.get(&envelope.event_type) {
            Some(handler) => handler.handle(envelope, phase).await,
            None => Err(HandlerError::Retryable(format!(
                "no handler registered for event type {}",
                envelope.event_type
            ))),
        }
    }

    async fn settle_terminal(
        &self,
        entry: &BrokerEntry,
        envelope: &inflow_domain::EventEnvelope,
        message: &str,
    ) -> Result<EntryOutcome, WorkerError> {
        let message = sanitize_error(message);
        if let Err(err) = self.store.fail_terminal(envelope.id, &message).await {
            warn!(
                event_id = %envelope.id,
                error = %err,
                "failed to record terminal failure; leaving pending"
            );
            return Ok(EntryOutcome::Skipped);
        }
        self.ack(entry).await?;
        warn!(
            event_id = %envelope.id,
            correlation_id = %envelope.correlation_id,
            attempts = envelope.attempts,
            error = %message,
            "event failed terminally"
        );
        Ok(EntryOutcome::Acked)
    }

    async fn settle_retryable(
        &self,
        entry: &BrokerEntry,
        envelope: &inflow_domain::EventEnvelope,
        message: &str,
    ) -> Result<EntryOutcome, WorkerError> {
        let message = sanitize_error(message);
        let next_attempt_at = self
            .settings
            .retry_policy
            .next_attempt_at(envelope.attempts, Utc::now());
        if let Err(err) = self
            .store
            .fail_retryable(envelope.id, &message, next_attempt_at)
            .await
        {
            warn!(
                event_id = %envelope.id,
                error = %err,
                "failed to record retryable failure; leaving pending"
            );
            return Ok(EntryOutcome::Skipped);
        }
        // The retry scheduler owns the event from here; this entry is done.
        self.ack(entry).await?;
        info!(
            event_id = %envelope.id,
            correlation_id = %envelope.correlation_id,
            attempts = envelope.attempts,
            next_attempt_at = %next_attempt_at,
            error = %message,
            "event scheduled for retry"
        );
        Ok(EntryOutcome::Acked)
    }

    async fn ack(&self, entry: &BrokerEntry) -> Result<(), WorkerError> {
        self.broker
            .ack(&self.settings.stream, &self.settings.group, &entry.id)
            .await?;
        Ok(())
    }

    async fn pause(
        &self,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
