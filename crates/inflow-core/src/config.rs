/// Env-backed loading for the service config structs (`IngestConfig`,
/// `WorkerConfig`).
///
/// Field names map to SCREAMING_SNAKE env vars (`database_url` ←
/// `DATABASE_URL`, `worker_claim_min_idle_ms` ← `WORKER_CLAIM_MIN_IDLE_MS`);
/// list-valued fields such as `INGEST_ALLOWED_EVENT_TYPES` are
/// comma-separated. Tunables carry serde defaults, so only the connection
/// URLs and per-instance identifiers are required.
///
/// # Panics
///
/// Panics if a required env var is missing or cannot be deserialized —
/// a service with broken configuration must not come up.
pub trait Config: Sized + serde::de::DeserializeOwned {
    fn from_env() -> Self {
        envy::from_env().expect("failed to load config from environment")
    }
}
