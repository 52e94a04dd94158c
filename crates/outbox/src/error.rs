use {crate::types::OutboxStatus, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("outbox entry not found: {id}")]
    NotFound { id: String },

    /// The requested transition does not start from the entry's current status.
    #[error("cannot {action} outbox entry {id}: status is {status}")]
    Conflict {
        id: String,
        status: OutboxStatus,
        action: &'static str,
    },

    #[error("invalid outbox entry {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error("invalid status in store: {value}")]
    InvalidStatus { value: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    #[must_use]
    pub fn conflict(id: impl Into<String>, status: OutboxStatus, action: &'static str) -> Self {
        Self::Conflict {
            id: id.into(),
            status,
            action,
        }
    }

    #[must_use]
    pub fn invalid(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            id: id.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl rukun_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

rukun_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
