/// Crate-wide result type for the notification layer.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Outbox(#[from] rukun_outbox::Error),

    #[error(transparent)]
    Channel(#[from] rukun_channels::Error),

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

    /// Operator action rejected because the entry is in the wrong status.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Outbox(e) if e.is_conflict())
    }
}

impl rukun_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

rukun_common::impl_context!();
