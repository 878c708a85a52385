use sea_orm::entity::prelude::*;

/// Event envelope row; source of truth for the event lifecycle.
///
/// `status` holds the SCREAMING_SNAKE string form of the domain status enum.
/// `(tenant_id, idempotency_key)` carries a partial unique index (key not
/// null) created by the migration.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: String,
    pub event_type: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub source: String,
    pub idempotency_key: Option<String>,
    pub correlation_id: Uuid,
    pub payload: Json,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::outbox_messages::Entity")]
    OutboxMessages,
}

impl Related<super::outbox_messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OutboxMessages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
