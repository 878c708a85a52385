//! sea-orm entities for the tables shared by the ingest and worker services.

pub mod events;
pub mod outbox_messages;
