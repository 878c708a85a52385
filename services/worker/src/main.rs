use sea_orm::Database;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use inflow_core::config::Config;
use inflow_core::tracing::init_tracing;
use inflow_worker::config::WorkerConfig;
use inflow_worker::consumer::{Worker, WorkerSettings};
use inflow_worker::domain::handler::HandlerRegistry;
use inflow_worker::infra::broker::RedisBroker;
use inflow_worker::infra::db::SeaOrmEventStore;
use inflow_worker::router::build_router;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = WorkerConfig::from_env();

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let redis_cfg = deadpool_redis::Config::from_url(&config.redis_url);
    let redis = redis_cfg
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("failed to create Redis pool");

    // Handlers are registered here by the embedding deployment; an event type
    // without a handler fails retryably and eventually goes terminal.
    let handlers = HandlerRegistry::new();

    let worker = Worker {
        broker: RedisBroker { pool: redis },
        store: SeaOrmEventStore { db },
        handlers,
        settings: WorkerSettings::from_config(&config),
    };

    let cancel = CancellationToken::new();
    let consumer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(err) = worker.run(cancel).await {
                error!(error = %err, "worker exited with error");
            }
        }
    });

    // Health endpoints beside the loop.
    let router = build_router();
    let addr = format!("0.0.0.0:{}", config.worker_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!("worker service listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .expect("server error");

    let _ = consumer.await;
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("shutdown signal received");
    cancel.cancel();
}
