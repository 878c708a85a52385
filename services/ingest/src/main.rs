use std::sync::Arc;
use std::time::Duration;

use sea_orm::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

use inflow_core::config::Config;
use inflow_core::tracing::init_tracing;
use inflow_ingest::config::IngestConfig;
use inflow_ingest::outbox::publisher::OutboxPublisher;
use inflow_ingest::retry::scheduler::RetryScheduler;
use inflow_ingest::router::build_router;
use inflow_ingest::state::AppState;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = IngestConfig::from_env();
    config.validate().expect("invalid ingestion configuration");

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis = redis_cfg
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to create Redis pool");

    let state = AppState {
        db,
        redis,
        allowed_event_types: Arc::new(config.ingest_allowed_event_types.clone()),
        stream_name: config.ingest_stream_name.clone(),
    };

    let cancel = CancellationToken::new();

    // Outbox publisher
    let publisher = OutboxPublisher {
        outbox: state.outbox_repo(),
        stream: state.stream_publisher(),
        poll_interval: Duration::from_millis(config.outbox_poll_interval_ms),
        max_batch_size: config.outbox_max_batch_size,
    };
    tokio::spawn({
        let cancel = cancel.clone();
        async move { publisher.run(cancel).await }
    });

    // Retry scheduler
    let scheduler = RetryScheduler {
        retries: state.retry_repo(),
        stream_name: config.ingest_stream_name.clone(),
        poll_interval: Duration::from_millis(config.retry_poll_interval_ms),
        max_batch_size: config.retry_max_batch_size,
    };
    tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    // HTTP server
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.ingest_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("ingest service listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .expect("server error");
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("shutdown signal received");
    cancel.cancel();
}
