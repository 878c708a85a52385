use sea_orm::{DbErr, SqlErr};

/// Storage failure classified at the repository boundary.
///
/// Callers match on the kind and never on driver details: `Conflict` maps to
/// idempotency handling, `Transient` to retry-later paths, `Other` to
/// internal errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A unique-constraint violation (idempotency key or primary key).
    #[error("storage conflict")]
    Conflict,
    /// Database unavailable, pool exhausted, or a timed-out statement.
    #[error("transient storage failure: {0}")]
    Transient(#[source] anyhow::Error),
    /// Anything else; not expected to resolve by retrying.
    #[error("storage failure: {0}")]
    Other(#[source] anyhow::Error),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify a sea-orm error into conflict / transient / other.
    pub fn from_db(err: DbErr) -> Self {
        if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            return Self::Conflict;
        }
        match &err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => Self::Transient(err.into()),
            DbErr::Exec(_) | DbErr::Query(_) if looks_transient(&err.to_string()) => {
                Self::Transient(err.into())
            }
            _ => Self::Other(err.into()),
        }
    }
}

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        Self::from_db(err)
    }
}

// Driver-level timeouts surface as Exec/Query errors; match on message since
// sqlx error kinds are not exposed through sea-orm.
fn looks_transient(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("timed out")
        || message.contains("timeout")
        || message.contains("connection closed")
        || message.contains("connection reset")
}
