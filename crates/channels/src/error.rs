use std::{error::Error as StdError, time::Duration};

use crate::state::SessionState;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is not `READY`; nothing was sent.
    #[error("channel not ready (state: {state})")]
    NotReady { state: SessionState },

    /// A transport call did not finish in time.
    #[error("{operation} timed out after {}s", after.as_secs_f64())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Authentication failed; `reset()` must run before a new handshake.
    #[error("channel authentication failed; reset the session before starting again")]
    NeedsReset,

    /// Credential material is locked by another process. Worth retrying.
    #[error("credential store busy: {message}")]
    CredentialsBusy { message: String },

    /// The transport rejected or failed an operation.
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn credentials_busy(message: impl std::fmt::Display) -> Self {
        Self::CredentialsBusy {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

impl rukun_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

rukun_common::impl_context!();
