use serde::Deserialize;

use inflow_core::backoff::BackoffConfig;
use inflow_core::config::Config;

/// Worker service configuration loaded from environment variables.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// TCP port for the health endpoints (default 3121).
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,
    /// Stream to consume.
    #[serde(default = "default_stream_name")]
    pub worker_stream_name: String,
    /// Consumer group name.
    #[serde(default = "default_group_name")]
    pub worker_group_name: String,
    /// This consumer's name within the group; must be stable across restarts
    /// of the same instance so its pending entries can be drained.
    pub worker_consumer_name: String,
    /// Entries per group read (default 10).
    #[serde(default = "default_read_batch_size")]
    pub worker_read_batch_size: usize,
    /// Sleep after an empty read (default 250 ms).
    #[serde(default = "default_empty_read_delay_ms")]
    pub worker_empty_read_delay_ms: u64,
    /// Sleep after a loop-level error (default 1000 ms).
    #[serde(default = "default_error_delay_ms")]
    pub worker_error_delay_ms: u64,
    /// Idle threshold before a pending entry may be reclaimed (default 30 s).
    #[serde(default = "default_claim_min_idle_ms")]
    pub worker_claim_min_idle_ms: u64,
    /// Entries per reclaim call (default 10).
    #[serde(default = "default_claim_batch_size")]
    pub worker_claim_batch_size: usize,
    /// Steady-state reclaim cadence (default 30 s).
    #[serde(default = "default_reclaim_interval_ms")]
    pub worker_reclaim_interval_ms: u64,
    /// Startup drain: maximum batches (default 10).
    #[serde(default = "default_drain_max_batches")]
    pub worker_drain_on_startup_max_batches: usize,
    /// Startup drain: maximum messages (default 100).
    #[serde(default = "default_drain_max_messages")]
    pub worker_drain_on_startup_max_messages: usize,
    /// Bootstrap backoff: initial delay (default 500 ms).
    #[serde(default = "default_bootstrap_initial_ms")]
    pub worker_bootstrap_initial_ms: u64,
    /// Bootstrap backoff: delay cap (default 30 s).
    #[serde(default = "default_bootstrap_max_ms")]
    pub worker_bootstrap_max_ms: u64,
    /// Bootstrap backoff: geometric factor (default 2.0).
    #[serde(default = "default_bootstrap_factor")]
    pub worker_bootstrap_factor: f64,
    /// Bootstrap backoff: attempt cap, 0 = unbounded (default 0).
    #[serde(default)]
    pub worker_bootstrap_max_attempts: u32,
}

impl Config for WorkerConfig {}

impl WorkerConfig {
    pub fn bootstrap_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: std::time::Duration::from_millis(self.worker_bootstrap_initial_ms),
            max_delay: std::time::Duration::from_millis(self.worker_bootstrap_max_ms),
            backoff_factor: self.worker_bootstrap_factor,
            max_attempts: self.worker_bootstrap_max_attempts,
        }
    }
}

fn default_worker_port() -> u16 {
    3121
}

fn default_stream_name() -> String {
    "inflow:events".to_owned()
}

fn default_group_name() -> String {
    "inflow-workers".to_owned()
}

fn default_read_batch_size() -> usize {
    10
}

fn default_empty_read_delay_ms() -> u64 {
    250
}

fn default_error_delay_ms() -> u64 {
    1000
}

fn default_claim_min_idle_ms() -> u64 {
    30_000
}

fn default_claim_batch_size() -> usize {
    10
}

fn default_reclaim_interval_ms() -> u64 {
    30_000
}

fn default_drain_max_batches() -> usize {
    10
}

fn default_drain_max_messages() -> usize {
    100
}

fn default_bootstrap_initial_ms() -> u64 {
    500
}

fn default_bootstrap_max_ms() -> u64 {
    30_000
}

fn default_bootstrap_factor() -> f64 {
    2.0
}
