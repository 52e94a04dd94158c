//! Outbound messaging channel.
//!
//! A [`ChannelSession`] drives one long-lived connection through the
//! `DISCONNECTED → CONNECTING → QR_PENDING → AUTHENTICATED → READY` lifecycle
//! on top of a [`ChannelTransport`], and a [`ReconnectSupervisor`] keeps it
//! there.

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod reconnect;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod transport;

pub use {
    error::{Error, Result},
    reconnect::{Backoff, ReconnectSupervisor},
    session::{ChannelSession, ResetOutcome, SessionConfig},
    snapshot::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore},
    state::{ChannelStatus, LifecycleEvent, SessionSnapshot, SessionState},
    transport::{ChannelTransport, LifecycleReceiver, LifecycleSender, SendReceipt},
};

/// Run database migrations for the channels crate.
///
/// Creates the `channel_session` table. Call at startup before constructing
/// [`SqliteSnapshotStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
