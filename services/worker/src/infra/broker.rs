use std::time::Duration;

use deadpool_redis::Pool;
use deadpool_redis::redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamClaimReply, StreamId,
    StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use deadpool_redis::redis::{AsyncCommands, ErrorKind, RedisError, from_redis_value};

use crate::domain::broker::{AutoClaimPage, Broker, BrokerEntry, BrokerError, ReadPosition};

/// Redis streams adapter for the worker's consumer-group surface.
#[derive(Clone)]
pub struct RedisBroker {
    pub pool: Pool,
}

impl RedisBroker {
    async fn conn(&self) -> Result<deadpool_redis::Connection, BrokerError> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::Transient(e.into()))
    }
}

fn classify(err: RedisError) -> BrokerError {
    if err.kind() == ErrorKind::ResponseError {
        let message = err.to_string();
        if message.contains("BUSYGROUP") {
            return BrokerError::GroupAlreadyExists;
        }
        if message.to_ascii_lowercase().contains("unknown command") {
            return BrokerError::Unsupported;
        }
    }
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || matches!(
            err.kind(),
            ErrorKind::TryAgain | ErrorKind::BusyLoadingError | ErrorKind::MasterDown
        )
    {
        return BrokerError::Transient(err.into());
    }
    BrokerError::Other(err.into())
}

fn entry_from_stream_id(id: StreamId) -> BrokerEntry {
    let fields = id
        .map
        .iter()
        .filter_map(|(key, value)| {
            from_redis_value::<String>(value)
                .ok()
                .map(|v| (key.clone(), v))
        })
        .collect();
    BrokerEntry { id: id.id, fields }
}

impl Broker for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: String = conn
            .xgroup_create_mkstream(stream, group, "$")
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let mut conn = self.conn().await?;
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        let id = match position {
            ReadPosition::OwnPending => "0",
            ReadPosition::New => ">",
        };
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[id], &options)
            .await
            .map_err(classify)?;
        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(entry_from_stream_id)
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(stream, group, &[entry_id])
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> Result<AutoClaimPage, BrokerError> {
        let mut conn = self.conn().await?;
        let options = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                stream,
                group,
                consumer,
                min_idle.as_millis() as u64,
                cursor,
                options,
            )
            .await
            .map_err(classify)?;
        Ok(AutoClaimPage {
            next_cursor: reply.next_stream_id,
            entries: reply.claimed.into_iter().map(entry_from_stream_id).collect(),
        })
    }

    async fn pending_idle(
        &self,
        stream: &str,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<String>, BrokerError> {
        let mut conn = self.conn().await?;
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", count as i64)
            .await
            .map_err(classify)?;
        // XPENDING's IDLE filter is not in every server version; filter on
        // the reported idle time instead.
        let min_idle_ms = min_idle.as_millis() as u64;
        Ok(reply
            .ids
            .into_iter()
            .filter(|pending| pending.last_delivered_ms as u64 >= min_idle_ms)
            .map(|pending| pending.id)
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let mut conn = self.conn().await?;
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, min_idle.as_millis() as u64, ids)
            .await
            .map_err(classify)?;
        Ok(reply.ids.into_iter().map(entry_from_stream_id).collect())
    }
}
