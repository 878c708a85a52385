use serde::Deserialize;

use inflow_core::config::Config;

/// Ingestion service configuration loaded from environment variables.
///
/// `INGEST_ALLOWED_EVENT_TYPES` is a comma-separated list; it must be
/// non-empty when `INGEST_ENVIRONMENT=production`.
#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// TCP port to listen on (default 3119).
    #[serde(default = "default_ingest_port")]
    pub ingest_port: u16,
    /// Allow-list for event_type.
    #[serde(default)]
    pub ingest_allowed_event_types: Vec<String>,
    /// Target broker stream for ingestion-generated outbox rows.
    #[serde(default = "default_stream_name")]
    pub ingest_stream_name: String,
    #[serde(default)]
    pub ingest_environment: Environment,
    /// Sleep between outbox publisher cycles.
    #[serde(default = "default_outbox_poll_interval_ms")]
    pub outbox_poll_interval_ms: u64,
    /// Outbox rows loaded per publisher cycle.
    #[serde(default = "default_outbox_max_batch_size")]
    pub outbox_max_batch_size: u64,
    /// Sleep between retry scheduler cycles.
    #[serde(default = "default_retry_poll_interval_ms")]
    pub retry_poll_interval_ms: u64,
    /// Due events re-enqueued per scheduler cycle.
    #[serde(default = "default_retry_max_batch_size")]
    pub retry_max_batch_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Config for IngestConfig {}

impl IngestConfig {
    /// Startup validation; a production instance without a registered-type
    /// allow-list would accept nothing but reject nothing either.
    pub fn validate(&self) -> Result<(), String> {
        if self.ingest_environment == Environment::Production
            && self.ingest_allowed_event_types.is_empty()
        {
            return Err(
                "INGEST_ALLOWED_EVENT_TYPES must be non-empty in production".to_owned(),
            );
        }
        Ok(())
    }
}

fn default_ingest_port() -> u16 {
    3119
}

fn default_stream_name() -> String {
    "inflow:events".to_owned()
}

fn default_outbox_poll_interval_ms() -> u64 {
    1000
}

fn default_outbox_max_batch_size() -> u64 {
    100
}

fn default_retry_poll_interval_ms() -> u64 {
    5000
}

fn default_retry_max_batch_size() -> u64 {
    50
}
