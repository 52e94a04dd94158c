//! In-memory outbox store for tests and dry runs.

use std::sync::Mutex;

use {async_trait::async_trait, tracing::warn};

use crate::{
    Error, Result,
    store::OutboxStore,
    types::{
        DeliveryLogEntry, LogStatus, OutboxCounts, OutboxFilter, OutboxMessage, OutboxStatus,
    },
};

#[derive(Default)]
struct Inner {
    /// Insertion order doubles as enqueue order.
    messages: Vec<OutboxMessage>,
    logs: Vec<DeliveryLogEntry>,
}

impl Inner {
    fn find_mut(&mut self, id: &str) -> Result<&mut OutboxMessage> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::not_found(id))
    }

    fn transition(
        &mut self,
        id: &str,
        from: OutboxStatus,
        to: OutboxStatus,
        log: LogStatus,
        response_text: &str,
        action: &'static str,
    ) -> Result<()> {
        let now = rukun_common::now_ms();
        let msg = self.find_mut(id)?;
        if msg.status != from {
            return Err(Error::conflict(id, msg.status, action));
        }
        msg.status = to;
        msg.updated_at_ms = now;
        if to == OutboxStatus::Failed {
            msg.retry_count = msg.retry_count.saturating_add(1);
        }
        self.logs
            .push(DeliveryLogEntry::new(id, log, response_text, now));
        Ok(())
    }
}

/// Outbox backed by a single mutex, so each status change and its log entry
/// are applied together. No persistence.
#[derive(Default)]
pub struct InMemoryOutboxStore {
    inner: Mutex<Inner>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn insert(&self, msg: &OutboxMessage) -> Result<()> {
        msg.validate()?;
        let mut inner = self.lock();
        if inner.messages.iter().any(|m| m.id == msg.id) {
            return Err(Error::message(format!("duplicate outbox id: {}", msg.id)));
        }
        inner.messages.push(msg.clone());
        Ok(())
    }

    async fn claim_batch(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let inner = self.lock();
        let mut pending: Vec<&OutboxMessage> = inner
            .messages
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending)
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        pending.sort_by_key(|m| m.created_at_ms);
        Ok(pending.into_iter().take(limit).cloned().collect())
    }

    async fn mark_sending(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock();
        match inner.messages.iter_mut().find(|m| m.id == id) {
            Some(msg) if msg.status == OutboxStatus::Pending => {
                msg.status = OutboxStatus::Sending;
                msg.updated_at_ms = rukun_common::now_ms();
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn mark_sent(&self, id: &str, response_text: &str) -> Result<()> {
        self.lock().transition(
            id,
            OutboxStatus::Sending,
            OutboxStatus::Sent,
            LogStatus::Sent,
            response_text,
            "mark as sent",
        )
    }

    async fn mark_failed(&self, id: &str, response_text: &str) -> Result<()> {
        self.lock().transition(
            id,
            OutboxStatus::Sending,
            OutboxStatus::Failed,
            LogStatus::Failed,
            response_text,
            "mark as failed",
        )
    }

    async fn retry(&self, id: &str) -> Result<()> {
        self.lock().transition(
            id,
            OutboxStatus::Failed,
            OutboxStatus::Pending,
            LogStatus::Retry,
            "retry requested",
            "retry",
        )
    }

    async fn recover_interrupted(&self, reason: &str) -> Result<u64> {
        let mut inner = self.lock();
        let stuck: Vec<String> = inner
            .messages
            .iter()
            .filter(|m| m.status == OutboxStatus::Sending)
            .map(|m| m.id.clone())
            .collect();
        for id in &stuck {
            inner.transition(
                id,
                OutboxStatus::Sending,
                OutboxStatus::Failed,
                LogStatus::Failed,
                reason,
                "recover",
            )?;
        }
        if !stuck.is_empty() {
            warn!(count = stuck.len(), "moved interrupted SENDING entries to FAILED");
        }
        Ok(stuck.len() as u64)
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxMessage>> {
        Ok(self.lock().messages.iter().find(|m| m.id == id).cloned())
    }

    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxMessage>> {
        let inner = self.lock();
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(inner
            .messages
            .iter()
            .rev()
            .filter(|m| filter.matches(m))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn logs(&self, outbox_id: &str) -> Result<Vec<DeliveryLogEntry>> {
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|l| l.outbox_id == outbox_id)
            .cloned()
            .collect())
    }

    async fn counts(&self) -> Result<OutboxCounts> {
        let mut counts = OutboxCounts::default();
        for msg in &self.lock().messages {
            counts.add(msg.status, 1);
        }
        Ok(counts)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    async fn enqueue(store: &InMemoryOutboxStore, to: &str) -> String {
        store
            .enqueue(None, to, "Unknown", json!({}))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_claim_in_order() {
        let store = InMemoryOutboxStore::new();
        let a = enqueue(&store, "0811").await;
        let b = enqueue(&store, "0812").await;

        let batch = store.claim_batch(10).await.unwrap();
        assert_eq!(
            batch.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
            vec![a, b]
        );
        assert_eq!(batch[0].recipient, "62811");
    }

    fn raw_message(recipient: &str, payload: serde_json::Value) -> OutboxMessage {
        OutboxMessage {
            id: "raw-1".into(),
            tenant_id: None,
            recipient: recipient.into(),
            template_key: "Unknown".into(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at_ms: 1,
            updated_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn insert_rejects_what_enqueue_would_normalize() {
        let store = InMemoryOutboxStore::new();
        for msg in [
            raw_message("0812-345 678", json!({})),
            raw_message("", json!({})),
            raw_message("62812345678", json!("not an object")),
        ] {
            let err = store.insert(&msg).await.unwrap_err();
            assert!(matches!(err, Error::Invalid { .. }), "{err}");
        }
        assert_eq!(store.counts().await.unwrap().total(), 0);

        store
            .insert(&raw_message("62812345678", json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(store.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn declined_address_creates_nothing() {
        let store = InMemoryOutboxStore::new();
        assert!(
            store
                .enqueue(None, "   ", "Unknown", json!({}))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.counts().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn failed_then_retry_then_sent() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, "62811").await;

        assert!(store.mark_sending(&id).await.unwrap());
        store.mark_failed(&id, "offline").await.unwrap();
        store.retry(&id).await.unwrap();
        assert!(store.mark_sending(&id).await.unwrap());
        store.mark_sent(&id, "ok").await.unwrap();

        let msg = store.get(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, OutboxStatus::Sent);
        assert_eq!(msg.retry_count, 1);
        let statuses: Vec<LogStatus> = store
            .logs(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.status)
            .collect();
        assert_eq!(statuses, vec![
            LogStatus::Failed,
            LogStatus::Retry,
            LogStatus::Sent
        ]);
    }

    #[tokio::test]
    async fn retry_conflicts_leave_no_trace() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, "62811").await;
        assert!(store.retry(&id).await.unwrap_err().is_conflict());
        assert!(store.logs(&id).await.unwrap().is_empty());
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            OutboxStatus::Pending
        );
    }

    #[tokio::test]
    async fn mark_sent_on_pending_is_conflict() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, "62811").await;
        assert!(store.mark_sent(&id, "x").await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn recover_interrupted_moves_sending_forward() {
        let store = InMemoryOutboxStore::new();
        let id = enqueue(&store, "62811").await;
        store.mark_sending(&id).await.unwrap();
        assert_eq!(store.recover_interrupted("restart").await.unwrap(), 1);
        assert_eq!(
            store.get(&id).await.unwrap().unwrap().status,
            OutboxStatus::Failed
        );
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = InMemoryOutboxStore::new();
        let _a = enqueue(&store, "62811").await;
        let b = enqueue(&store, "62812").await;
        let listed = store.list(&OutboxFilter::default()).await.unwrap();
        assert_eq!(listed[0].id, b);
    }
}
