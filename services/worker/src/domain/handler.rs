use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use inflow_domain::EventEnvelope;

/// Which part of the worker picked the entry up. Carried into handlers and
/// structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    StartupDrain,
    ReclaimAuto,
    ReclaimManual,
    Live,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartupDrain => "startup-drain",
            Self::ReclaimAuto => "reclaim-auto",
            Self::ReclaimManual => "reclaim-manual",
            Self::Live => "live",
        }
    }
}

/// Handler failure; decides which failure state the event moves to.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Expected to resolve on a later attempt.
    #[error("{0}")]
    Retryable(String),
    /// Bad input or a broken invariant; retrying cannot help.
    #[error("{0}")]
    Terminal(String),
}

/// Business logic invoked per event type.
///
/// Implementations MUST be idempotent: at-least-once delivery means the same
/// event can arrive more than once, and reclaim can re-run a handler whose
/// worker died mid-flight.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope, phase: Phase) -> Result<(), HandlerError>;
}

/// Dispatch table from event_type to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
