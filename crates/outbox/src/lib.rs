//! Durable notification outbox.
//!
//! Producers enqueue messages addressed to a resident's phone; the delivery
//! worker claims them oldest first and records every outcome as a status
//! transition plus an immutable [`DeliveryLogEntry`](types::DeliveryLogEntry)
//! in the same unit of work.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    store::OutboxStore,
    store_memory::InMemoryOutboxStore,
    store_sqlite::SqliteOutboxStore,
    types::{
        DeliveryLogEntry, LogStatus, NewOutboxMessage, OutboxCounts, OutboxFilter, OutboxMessage,
        OutboxStatus,
    },
};

/// Run database migrations for the outbox crate.
///
/// Creates the `notification_outbox` and `notification_log` tables. Call at
/// startup before constructing [`SqliteOutboxStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
