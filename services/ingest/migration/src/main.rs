use sea_orm_migration::prelude::*;

mod m20260701_000001_create_events;
mod m20260701_000002_create_outbox_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260701_000001_create_events::Migration),
            Box::new(m20260701_000002_create_outbox_messages::Migration),
        ]
    }
}

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
