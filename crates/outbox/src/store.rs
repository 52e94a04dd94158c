//! Persistence trait for the outbox.

use {async_trait::async_trait, serde_json::Value, tracing::debug};

#[cfg(feature = "metrics")]
use rukun_metrics::{counter, labels, outbox as outbox_metrics};

use crate::{
    Result,
    types::{DeliveryLogEntry, NewOutboxMessage, OutboxCounts, OutboxFilter, OutboxMessage},
};

/// Durable outbox of notifications plus their delivery log.
///
/// Every method that changes an entry's status also appends the matching
/// log entry in the same unit of work, so a reader never observes one
/// without the other.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Store an entry as given.
    ///
    /// Fails with [`Invalid`](crate::Error::Invalid) unless the recipient is
    /// canonical and the payload is an object. Prefer
    /// [`OutboxStore::enqueue`], which normalizes first.
    async fn insert(&self, msg: &OutboxMessage) -> Result<()>;

    /// Up to `limit` `PENDING` entries, oldest first.
    ///
    /// A plain read. Exclusivity comes from [`OutboxStore::mark_sending`].
    async fn claim_batch(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Conditionally move `PENDING → SENDING`.
    ///
    /// Returns `false` when the entry is no longer pending, i.e. someone else
    /// claimed it or an operator touched it since the batch was read.
    async fn mark_sending(&self, id: &str) -> Result<bool>;

    /// `SENDING → SENT` plus a `SENT` log entry.
    async fn mark_sent(&self, id: &str, response_text: &str) -> Result<()>;

    /// `SENDING → FAILED`, `retry_count + 1`, plus a `FAILED` log entry.
    async fn mark_failed(&self, id: &str, response_text: &str) -> Result<()>;

    /// `FAILED → PENDING` plus a `RETRY` log entry. Any other status is a
    /// [`Conflict`](crate::Error::Conflict) and changes nothing.
    async fn retry(&self, id: &str) -> Result<()>;

    /// Move entries stranded in `SENDING` (the process died mid-send) to
    /// `FAILED`, logging `reason` for each. Returns how many were moved.
    async fn recover_interrupted(&self, reason: &str) -> Result<u64>;

    async fn get(&self, id: &str) -> Result<Option<OutboxMessage>>;

    async fn list(&self, filter: &OutboxFilter) -> Result<Vec<OutboxMessage>>;

    /// Log entries for one outbox entry, oldest first.
    async fn logs(&self, outbox_id: &str) -> Result<Vec<DeliveryLogEntry>>;

    async fn counts(&self) -> Result<OutboxCounts>;

    /// Normalize the address and insert a `PENDING` entry.
    ///
    /// An address with no digits is declined silently: no entry, no error,
    /// `Ok(None)`.
    async fn enqueue(
        &self,
        tenant_id: Option<&str>,
        raw_address: &str,
        template_key: &str,
        payload: Value,
    ) -> Result<Option<String>> {
        let Some(new) = NewOutboxMessage::new(tenant_id, raw_address, template_key, payload)
        else {
            debug!(template_key, "enqueue declined: address has no digits");
            #[cfg(feature = "metrics")]
            counter!(outbox_metrics::DECLINED_TOTAL, labels::TEMPLATE => template_key.to_string())
                .increment(1);
            return Ok(None);
        };

        let msg = new.into_message(rukun_common::now_ms());
        self.insert(&msg).await?;

        debug!(id = %msg.id, template_key, "notification enqueued");
        #[cfg(feature = "metrics")]
        counter!(outbox_metrics::ENQUEUED_TOTAL, labels::TEMPLATE => template_key.to_string())
            .increment(1);
        Ok(Some(msg.id))
    }
}
