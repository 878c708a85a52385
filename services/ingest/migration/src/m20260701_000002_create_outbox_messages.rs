use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OutboxMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutboxMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OutboxMessages::EventId).uuid().not_null())
                    .col(
                        ColumnDef::new(OutboxMessages::StreamName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxMessages::PublishedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(OutboxMessages::PublishAttempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(OutboxMessages::LastError).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_outbox_messages_event_id")
                            .from(OutboxMessages::Table, OutboxMessages::EventId)
                            .to(Events::Table, Events::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Publisher poll: unpublished rows in insertion order.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX idx_outbox_messages_unpublished \
                 ON outbox_messages (created_at) \
                 WHERE published_at IS NULL",
            )
            .await?;

        // Prune: published rows by publish time.
        manager
            .create_index(
                Index::create()
                    .table(OutboxMessages::Table)
                    .col(OutboxMessages::PublishedAt)
                    .name("idx_outbox_messages_published_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxMessages::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum OutboxMessages {
    Table,
    Id,
    EventId,
    StreamName,
    Payload,
    CreatedAt,
    PublishedAt,
    PublishAttempts,
    LastError,
}

#[derive(Iden)]
enum Events {
    Table,
    Id,
}
