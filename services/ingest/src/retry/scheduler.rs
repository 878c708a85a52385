use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use inflow_core::error::StorageError;
use inflow_domain::OutboxMessage;

use crate::domain::repository::RetryRepository;

/// Re-enqueues FAILED_RETRYABLE events whose schedule has come due.
///
/// Each due event goes back to QUEUED together with a fresh outbox row in one
/// transaction, so the publisher republishes it. The attempt cap is enforced
/// by the worker at failure time (PROCESSING -> FAILED_TERMINAL), so every
/// row this loop sees still has retry budget.
pub struct RetryScheduler<R>
where
    R: RetryRepository,
{
    pub retries: R,
    pub stream_name: String,
    pub poll_interval: Duration,
    pub max_batch_size: u64,
}

impl<R> RetryScheduler<R>
where
    R: RetryRepository,
{
    pub async fn run(&self, cancel: CancellationToken) {
        info!("retry scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("retry scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            match self.run_cycle().await {
                Ok(0) => {}
                Ok(requeued) => debug!(requeued, "retry cycle complete"),
                Err(err) => warn!(error = %err, "retry cycle failed"),
            }
        }
    }

    /// One scheduler cycle; returns the number of events re-enqueued.
    pub async fn run_cycle(&self) -> Result<usize, StorageError> {
        let due = self
            .retries
            .load_due_retries(Utc::now(), self.max_batch_size)
            .await?;
        let mut requeued = 0;
        for mut envelope in due {
            if let Err(err) = envelope.requeue() {
                // Another scheduler instance may have moved it first.
                debug!(event_id = %envelope.id, error = %err, "skipping stale retry row");
                continue;
            }
            let outbox = OutboxMessage::for_envelope(&envelope, &self.stream_name);
            match self.retries.requeue_with_outbox(&envelope, &outbox).await {
                Ok(()) => {
                    debug!(
                        event_id = %envelope.id,
                        correlation_id = %envelope.correlation_id,
                        attempts = envelope.attempts,
                        "event re-enqueued"
                    );
                    requeued += 1;
                }
                Err(err) => {
                    warn!(event_id = %envelope.id, error = %err, "re-enqueue failed");
                }
            }
        }
        Ok(requeued)
    }
}
