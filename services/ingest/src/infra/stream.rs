use anyhow::Context as _;
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;

use crate::domain::repository::StreamPublisher;

/// Broker adapter for the outbox publisher: appends entries with XADD.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    pub pool: Pool,
}

impl StreamPublisher for RedisStreamPublisher {
    async fn publish(
        &self,
        stream: &str,
        fields: &[(&'static str, String)],
    ) -> Result<String, anyhow::Error> {
        let mut conn = self.pool.get().await.context("acquire redis connection")?;
        let entry_id: String = conn
            .xadd(stream, "*", fields)
            .await
            .with_context(|| format!("xadd to {stream}"))?;
        Ok(entry_id)
    }
}
