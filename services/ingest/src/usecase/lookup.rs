use uuid::Uuid;

use inflow_domain::EventEnvelope;

use crate::domain::repository::EventRepository;
use crate::error::IngestServiceError;

/// Operational read path: fetch an envelope's lifecycle view by id.
pub struct GetEventUseCase<E: EventRepository> {
    pub events: E,
}

impl<E: EventRepository> GetEventUseCase<E> {
    pub async fn execute(&self, id: Uuid) -> Result<EventEnvelope, IngestServiceError> {
        self.events
            .find_by_id(id)
            .await?
            .ok_or(IngestServiceError::NotFound)
    }
}
