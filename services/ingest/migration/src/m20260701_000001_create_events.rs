use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Events::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Events::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Events::TenantId).string().not_null())
                    .col(ColumnDef::new(Events::EventType).string().not_null())
                    .col(
                        ColumnDef::new(Events::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Events::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Events::Source).string().not_null())
                    .col(ColumnDef::new(Events::IdempotencyKey).string())
                    .col(ColumnDef::new(Events::CorrelationId).uuid().not_null())
                    .col(ColumnDef::new(Events::Payload).json_binary().not_null())
                    .col(ColumnDef::new(Events::Status).string().not_null())
                    .col(
                        ColumnDef::new(Events::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Events::NextAttemptAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Events::LastError).string())
                    .to_owned(),
            )
            .await?;

        // Partial unique index for idempotency: at most one event per
        // (tenant_id, idempotency_key) when a key is present. sea-query has
        // no partial-index builder, so raw SQL.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX idx_events_tenant_idempotency_key \
                 ON events (tenant_id, idempotency_key) \
                 WHERE idempotency_key IS NOT NULL",
            )
            .await?;

        // Retry-scheduler poll: FAILED_RETRYABLE rows ordered by schedule.
        manager
            .create_index(
                Index::create()
                    .table(Events::Table)
                    .col(Events::Status)
                    .col(Events::NextAttemptAt)
                    .name("idx_events_status_next_attempt_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Events::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Events {
    Table,
    Id,
    TenantId,
    EventType,
    OccurredAt,
    ReceivedAt,
    Source,
    IdempotencyKey,
    CorrelationId,
    Payload,
    Status,
    Attempts,
    NextAttemptAt,
    LastError,
}
