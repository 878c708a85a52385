use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use inflow_core::error::StorageError;
use inflow_domain::envelope::sanitize_error;

use crate::domain::repository::{OutboxRepository, StreamPublisher};

/// Prune runs on every n-th cycle.
const PRUNE_EVERY_CYCLES: u64 = 10;
/// Published rows older than this are deleted by the prune step.
const PRUNE_RETENTION_HOURS: i64 = 24;

/// Relays outbox rows onto the broker, marks them published, and prunes old
/// published rows.
///
/// The publisher never gives up on a row: a failed publish bumps the row's
/// attempt counter and leaves it eligible for the next cycle, so backpressure
/// accumulates in the table rather than in memory.
pub struct OutboxPublisher<O, P>
where
    O: OutboxRepository,
    P: StreamPublisher,
{
    pub outbox: O,
    pub stream: P,
    pub poll_interval: Duration,
    pub max_batch_size: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub published: usize,
    pub failed: usize,
}

impl<O, P> OutboxPublisher<O, P>
where
    O: OutboxRepository,
    P: StreamPublisher,
{
    pub async fn run(&self, cancel: CancellationToken) {
        info!("outbox publisher started");
        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("outbox publisher stopped");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            cycle += 1;
            match self.run_cycle().await {
                Ok(stats) if stats.published > 0 || stats.failed > 0 => {
                    debug!(
                        published = stats.published,
                        failed = stats.failed,
                        "outbox cycle complete"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "outbox cycle failed"),
            }
            if cycle % PRUNE_EVERY_CYCLES == 0 {
                self.prune().await;
            }
        }
    }

    /// One publisher cycle: load unpublished rows oldest-first and relay each.
    ///
    /// Per-row failures (broker rejects, or marking fails after a successful
    /// publish) are recorded and do not block the remaining rows; a mark that
    /// fails after broker acceptance leaves the row eligible, which is the
    /// accepted at-least-once duplicate.
    pub async fn run_cycle(&self) -> Result<CycleStats, StorageError> {
        let batch = self.outbox.load_unpublished(self.max_batch_size).await?;
        let mut stats = CycleStats::default();
        for row in batch {
            match self.stream.publish(&row.stream_name, &row.stream_fields()).await {
                Ok(entry_id) => {
                    if let Err(err) = self.outbox.mark_published(row.id).await {
                        warn!(
                            outbox_id = %row.id,
                            event_id = %row.event_id,
                            error = %err,
                            "published but failed to mark; row will be republished"
                        );
                        stats.failed += 1;
                        continue;
                    }
                    debug!(
                        outbox_id = %row.id,
                        event_id = %row.event_id,
                        entry_id = %entry_id,
                        "outbox row published"
                    );
                    stats.published += 1;
                }
                Err(err) => {
                    warn!(
                        outbox_id = %row.id,
                        event_id = %row.event_id,
                        error = %err,
                        "publish failed; row stays eligible"
                    );
                    if let Err(err) = self
                        .outbox
                        .record_publish_failure(row.id, &sanitize_error(&err.to_string()))
                        .await
                    {
                        warn!(outbox_id = %row.id, error = %err, "failed to record publish failure");
                    }
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn prune(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(PRUNE_RETENTION_HOURS);
        match self.outbox.prune_published_before(cutoff).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "pruned published outbox rows"),
            Err(err) => warn!(error = %err, "outbox prune failed"),
        }
    }
}
