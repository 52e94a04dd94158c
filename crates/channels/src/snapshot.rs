//! Persistence for the last known session snapshot.

use std::{collections::HashMap, sync::Mutex};

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool},
};

use crate::{
    Result,
    state::{SessionSnapshot, SessionState},
};

/// Where the session records its state so `status` can be answered by a
/// process that does not own the connection.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, session_name: &str) -> Result<Option<SessionSnapshot>>;
    async fn save(&self, session_name: &str, snapshot: &SessionSnapshot) -> Result<()>;
}

/// SQLite-backed snapshot store (`channel_session` table).
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Create a store over an existing pool. Call [`crate::run_migrations`]
    /// first.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self, session_name: &str) -> Result<Option<SessionSnapshot>> {
        let row = sqlx::query(
            "SELECT state, connected_address, last_connected_at, updated_at
             FROM channel_session WHERE session_name = ?",
        )
        .bind(session_name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.get("state");
        let state = state.parse::<SessionState>().unwrap_or_else(|e| {
            tracing::warn!(session_name, error = %e, "unreadable persisted state");
            SessionState::Disconnected
        });
        Ok(Some(SessionSnapshot {
            state,
            connected_address: row.get("connected_address"),
            qr_artifact: None,
            last_connected_at: row.get("last_connected_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save(&self, session_name: &str, snapshot: &SessionSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO channel_session
                (session_name, state, connected_address, last_connected_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_name) DO UPDATE SET
                state = excluded.state,
                connected_address = excluded.connected_address,
                last_connected_at = excluded.last_connected_at,
                updated_at = excluded.updated_at",
        )
        .bind(session_name)
        .bind(snapshot.state.as_str())
        .bind(&snapshot.connected_address)
        .bind(snapshot.last_connected_at)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Snapshot store kept in process memory.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    rows: Mutex<HashMap<String, SessionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, session_name: &str) -> Result<Option<SessionSnapshot>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(session_name).cloned())
    }

    async fn save(&self, session_name: &str, snapshot: &SessionSnapshot) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.insert(session_name.to_string(), SessionSnapshot {
            qr_artifact: None,
            ..snapshot.clone()
        });
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, sqlx::sqlite::SqlitePoolOptions};

    async fn sqlite_store() -> SqliteSnapshotStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqliteSnapshotStore::new(pool)
    }

    fn ready_snapshot() -> SessionSnapshot {
        SessionSnapshot {
            state: SessionState::Ready,
            connected_address: Some("628111".into()),
            qr_artifact: Some("never stored".into()),
            last_connected_at: Some(100),
            updated_at: 100,
        }
    }

    #[tokio::test]
    async fn sqlite_missing_row_is_none() {
        let store = sqlite_store().await;
        assert!(store.load("portal-rt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_upsert_overwrites() {
        let store = sqlite_store().await;
        store.save("portal-rt", &ready_snapshot()).await.unwrap();

        let loaded = store.load("portal-rt").await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Ready);
        assert_eq!(loaded.connected_address.as_deref(), Some("628111"));
        assert!(loaded.qr_artifact.is_none());

        let down = ready_snapshot().with_state(SessionState::Disconnected, 200);
        store.save("portal-rt", &down).await.unwrap();
        let loaded = store.load("portal-rt").await.unwrap().unwrap();
        assert_eq!(loaded.state, SessionState::Disconnected);
        assert!(loaded.connected_address.is_none());
        assert_eq!(loaded.last_connected_at, Some(100));
        assert_eq!(loaded.updated_at, 200);
    }

    #[tokio::test]
    async fn sqlite_sessions_are_independent() {
        let store = sqlite_store().await;
        store.save("a", &ready_snapshot()).await.unwrap();
        assert!(store.load("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_drops_qr() {
        let store = InMemorySnapshotStore::new();
        store.save("s", &ready_snapshot()).await.unwrap();
        let loaded = store.load("s").await.unwrap().unwrap();
        assert!(loaded.qr_artifact.is_none());
        assert_eq!(loaded.state, SessionState::Ready);
    }
}
