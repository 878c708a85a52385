use inflow_core::error::StorageError;

use crate::domain::broker::BrokerError;

/// Worker loop failure.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Shutdown was requested; always re-raised, never swallowed.
    #[error("worker cancelled")]
    Cancelled,
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
