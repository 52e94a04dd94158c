//! SQLite-backed outbox store using sqlx.

use std::str::FromStr;

use {
    async_trait::async_trait,
    serde_json::Value,
    sqlx::{
        Row, Sqlite, SqlitePool, Transaction,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    },
    tracing::warn,
};

#[cfg(feature = "metrics")]
use rukun_metrics::{counter, outbox as outbox_metrics};

use crate::{
    Error, Result,
    error::Context,
    store::OutboxStore,
    types::{
        DeliveryLogEntry, LogStatus, OutboxCounts, OutboxFilter, OutboxMessage, OutboxStatus,
    },
};

const MESSAGE_COLUMNS: &str = "id, tenant_id, recipient, template_key, payload, status, \
                               retry_count, created_at, updated_at";

/// SQLite persistence for outbox entries and the delivery log.
pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    /// Open (creating if needed) a standalone database and run migrations.
    ///
    /// For a pool shared with other crates use [`SqliteOutboxStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store over an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: &str) -> Result<Option<OutboxStatus>> {
        let row = sqlx::query("SELECT status FROM notification_outbox WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.get::<String, _>("status").parse())
            .transpose()
    }

    /// Error for a conditional update that matched no row.
    async fn transition_error(&self, id: &str, action: &'static str) -> Error {
        match self.current_status(id).await {
            Ok(Some(status)) => Error::conflict(id, status, action),
            Ok(None) => Error::not_found(id),
            Err(e) => e,
        }
    }

    /// Apply `from → to` and append a log entry inside one transaction.
    async fn transition(
        &self,
        id: &str,
        from: OutboxStatus,
        to: OutboxStatus,
        log: LogStatus,
        response_text: &str,
        action: &'static str,
    ) -> Result<()> {
        let now = rukun_common::now_ms();
        let mut tx = self.pool.begin().await?;

        let bump = i64::from(to == OutboxStatus::Failed);
        let result = sqlx::query(
            "UPDATE notification_outbox
             SET status = ?, retry_count = retry_count + ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(bump)
        .bind(now)
        .bind(id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.transition_error(id, action).await);
        }

        insert_log(&mut tx, &DeliveryLogEntry::new(id, log, response_text, now)).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_log(tx: &mut Transaction<'_, Sqlite>, entry: &DeliveryLogEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO notification_log (id, outbox_id, sent_at, status, response_text, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.outbox_id)
    .bind(entry.sent_at_ms)
    .bind(entry.status.as_str())
    .bind(&entry.response_text)
    .bind(entry.created_at_ms)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Stored payload text back to an object; anything unreadable becomes `{}`.
fn parse_payload(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::Object(Default::default()),
    }
}

fn row_to_message(row: &SqliteRow) -> Result<OutboxMessage> {
    let status: String = row.get("status");
    let payload: String = row.get("payload");
    Ok(OutboxMessage {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        recipient: row.get("recipient"),
        template_key: row.get("template_key"),
        payload: parse_payload(&payload),
        status: status.parse()?,
        retry_count: u32::try_from(row.get::<i64, _>("retry_count")).unwrap_or(u32::MAX),
        created_at_ms: row.get("created_at"),
        updated_at_ms: row.get("updated_at"),
    })
}

fn row_to_log(row: &SqliteRow) -> Result<DeliveryLogEntry> {
    let status: String = row.get("status");
    Ok(DeliveryLogEntry {
        id: row.get("id"),
        outbox_id: row.get("outbox_id"),
        sent_at_ms: row.get("sent_at"),
        status: status.parse()?,
        response_text: row.get("response_text"),
        created_at_ms: row.get("created_at"),
    })
}

#[async_trait]
impl OutboxStore for SqliteOutboxStore {
    async fn insert(&self, msg: &OutboxMessage) -> Result<()> {
        msg.validate()?;
        let payload = serde_json::to_string(&msg.payload)?;
        sqlx::query(
            "INSERT INTO notification_outbox
             (id, tenant_id, recipient, template_key, payload, status, retry_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.tenant_id)
        .bind(&msg.recipient)
        .bind(&msg.template_key)
        .bind(&payload)
        .bind(msg.status.as_str())
        .bind(i64::from(msg.retry_count))
        .bind(msg.created_at_ms)
        .bind(msg.updated_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_batch(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM notification_outbox
             WHERE status = 'PENDING'
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn mark_sending(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notification_outbox
             SET status = 'SENDING', updated_at = ?
             WHERE id = ? AND status = 'PENDING'",
        )
        .bind(rukun_common::now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_sent(&self, id: &str, response_text: &str) -> Result<()> {
        self.transition(
            id,
            OutboxStatus::Sending,
            OutboxStatus::Sent,
            LogStatus::Sent,
            response_text,
            "mark as sent",
        )
        .await
    }

    async fn mark_failed(&self, id: &str, response_text: &str) -> Result<()> {
        self.transition(
            id,
            OutboxStatus::Sending,
            OutboxStatus::Failed,
            LogStatus::Failed,
            response_text,
            "mark as failed",
        )
        .await
    }

    async fn retry(&self, id: &str) -> Result<()> {
        self.transition(
            id,
            OutboxStatus::Failed,
            OutboxStatus::Pending,
            LogStatus::Retry,
            "retry requested",
            "retry",
        )
        .await?;
        #[cfg(feature = "metrics")]
        counter!(outbox_metrics::RETRIED_TOTAL).increment(1);
        Ok(())
    }

    async fn recover_interrupted(&self, reason: &str) -> Result<u64> {
        let now = rukun_common::now_ms();
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM notification_outbox WHERE status = 'SENDING'")
                .fetch_all(&mut *tx)
                .await?;

        for id in &ids {
            sqlx::query(
                "UPDATE notification_outbox
                 SET status = 'FAILED', retry_count = retry_count + 1, updated_at = ?
                 WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            insert_log(
                &mut tx,
                &DeliveryLogEntry::new(id, LogStatus::Failed, reason, now),
            )
            .await?;
        }
        tx.commit().await?;

        if !ids.is_empty() {
            warn!(count = ids.len(), "moved interrupted SENDING entries to FAILED");
            #[cfg(feature = "metrics")]
            counter!(outbox_metrics::RECOVERED_TOTAL).increment(ids.len() as u64);
        }
        Ok(ids.len() as u64)
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM notification_outbox WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxMessage>> {
        let limit = filter
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM notification_outbox
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR tenant_id = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))
        .bind(filter.status.map(OutboxStatus::as_str))
        .bind(filter.tenant_id.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn logs(&self, outbox_id: &str) -> Result<Vec<DeliveryLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, outbox_id, sent_at, status, response_text, created_at
             FROM notification_log
             WHERE outbox_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(outbox_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_log).collect()
    }

    async fn counts(&self) -> Result<OutboxCounts> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM notification_outbox GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = OutboxCounts::default();
        for row in rows {
            let status: OutboxStatus = row.get::<String, _>("status").parse()?;
            counts.add(status, u64::try_from(row.get::<i64, _>("n")).unwrap_or(0));
        }
        Ok(counts)
    }
}
