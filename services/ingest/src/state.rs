use std::sync::Arc;

use deadpool_redis::Pool as RedisPool;
use sea_orm::DatabaseConnection;

use crate::infra::db::{DbEventRepository, DbOutboxRepository, DbRetryRepository};
use crate::infra::stream::RedisStreamPublisher;

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub redis: RedisPool,
    pub allowed_event_types: Arc<Vec<String>>,
    pub stream_name: String,
}

impl AppState {
    pub fn event_repo(&self) -> DbEventRepository {
        DbEventRepository {
            db: self.db.clone(),
        }
    }

    pub fn outbox_repo(&self) -> DbOutboxRepository {
        DbOutboxRepository {
            db: self.db.clone(),
        }
    }

    pub fn retry_repo(&self) -> DbRetryRepository {
        DbRetryRepository {
            db: self.db.clone(),
        }
    }

    pub fn stream_publisher(&self) -> RedisStreamPublisher {
        RedisStreamPublisher {
            pool: self.redis.clone(),
        }
    }
}
