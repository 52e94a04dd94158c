//! Core data types for the notification outbox.

use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::Error;

/// Delivery status of an outbox entry.
///
/// The worker only moves entries forward (`PENDING → SENDING → SENT | FAILED`);
/// `FAILED → PENDING` happens only through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Sending, Self::Sent, Self::Failed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidStatus { value: s.into() })
    }
}

/// Status recorded on a delivery log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Sent,
    Failed,
    Retry,
}

impl LogStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Retry => "RETRY",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "RETRY" => Ok(Self::Retry),
            other => Err(Error::InvalidStatus {
                value: other.into(),
            }),
        }
    }
}

/// A message waiting for, or done with, delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: String,
    /// Owning association. Carried for auditing, never read by delivery.
    pub tenant_id: Option<String>,
    /// Canonical digits-only address, never empty.
    pub recipient: String,
    pub template_key: String,
    /// Template fields. Always a JSON object.
    pub payload: Value,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl OutboxMessage {
    /// Reject entries no store may hold: a recipient that is not canonical
    /// digits, or a payload that is not a JSON object.
    pub fn validate(&self) -> Result<(), Error> {
        if !rukun_common::is_canonical(&self.recipient) {
            return Err(Error::invalid(
                &self.id,
                format!("recipient {:?} is not a canonical address", self.recipient),
            ));
        }
        if !self.payload.is_object() {
            return Err(Error::invalid(&self.id, "payload must be a JSON object"));
        }
        Ok(())
    }
}

/// Immutable record of a delivery outcome or an operator retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub id: String,
    pub outbox_id: String,
    /// When the channel attempt finished. `None` for `RETRY` entries.
    pub sent_at_ms: Option<i64>,
    pub status: LogStatus,
    pub response_text: Option<String>,
    pub created_at_ms: i64,
}

impl DeliveryLogEntry {
    pub(crate) fn new(outbox_id: &str, status: LogStatus, response_text: &str, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            outbox_id: outbox_id.to_string(),
            sent_at_ms: (status != LogStatus::Retry).then_some(now),
            status,
            response_text: Some(response_text.to_string()),
            created_at_ms: now,
        }
    }
}

/// A validated entry ready for insertion.
///
/// Only [`NewOutboxMessage::new`] builds one, so an unnormalizable address can
/// never reach a store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxMessage {
    tenant_id: Option<String>,
    recipient: String,
    template_key: String,
    payload: Value,
}

impl NewOutboxMessage {
    /// Normalize `raw_address` and coerce `payload` to an object.
    ///
    /// Returns `None` when the address holds no digits.
    #[must_use]
    pub fn new(
        tenant_id: Option<&str>,
        raw_address: &str,
        template_key: &str,
        payload: Value,
    ) -> Option<Self> {
        let recipient = rukun_common::normalize_address(raw_address);
        if recipient.is_empty() {
            return None;
        }
        let payload = match payload {
            Value::Object(_) => payload,
            Value::Null => Value::Object(Default::default()),
            other => {
                tracing::warn!(template_key, payload = %other, "non-object payload replaced with {{}}");
                Value::Object(Default::default())
            },
        };
        Some(Self {
            tenant_id: tenant_id.map(str::to_string),
            recipient,
            template_key: template_key.to_string(),
            payload,
        })
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Materialize as a fresh `PENDING` entry.
    #[must_use]
    pub fn into_message(self, now: i64) -> OutboxMessage {
        OutboxMessage {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id,
            recipient: self.recipient,
            template_key: self.template_key,
            payload: self.payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }
}

/// Listing filter, newest entries first.
#[derive(Debug, Clone, Default)]
pub struct OutboxFilter {
    pub status: Option<OutboxStatus>,
    pub tenant_id: Option<String>,
    pub limit: Option<usize>,
}

impl OutboxFilter {
    pub(crate) fn matches(&self, msg: &OutboxMessage) -> bool {
        self.status.is_none_or(|s| s == msg.status)
            && self
                .tenant_id
                .as_deref()
                .is_none_or(|t| msg.tenant_id.as_deref() == Some(t))
    }
}

/// Number of entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
}

impl OutboxCounts {
    pub(crate) fn add(&mut self, status: OutboxStatus, n: u64) {
        match status {
            OutboxStatus::Pending => self.pending += n,
            OutboxStatus::Sending => self.sending += n,
            OutboxStatus::Sent => self.sent += n,
            OutboxStatus::Failed => self.failed += n,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.sending + self.sent + self.failed
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn status_string_roundtrip() {
        for status in OutboxStatus::ALL {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert_eq!("failed".parse::<OutboxStatus>().unwrap(), OutboxStatus::Failed);
        assert!("DONE".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_value(OutboxStatus::Pending).unwrap(),
            json!("PENDING")
        );
        assert_eq!(serde_json::to_value(LogStatus::Retry).unwrap(), json!("RETRY"));
    }

    #[test]
    fn new_message_normalizes_address() {
        let msg = NewOutboxMessage::new(Some("rt-1"), "0812-345-678", "Unknown", json!({}))
            .unwrap()
            .into_message(1_000);
        assert_eq!(msg.recipient, "62812345678");
        assert_eq!(msg.status, OutboxStatus::Pending);
        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.created_at_ms, 1_000);
    }

    #[test]
    fn new_message_declines_empty_address() {
        assert!(NewOutboxMessage::new(None, "-- --", "Unknown", json!({})).is_none());
        assert!(NewOutboxMessage::new(None, "", "Unknown", json!({})).is_none());
    }

    #[test]
    fn null_payload_becomes_empty_object() {
        let new = NewOutboxMessage::new(None, "62811", "X", Value::Null).unwrap();
        assert_eq!(new.into_message(0).payload, json!({}));
    }

    #[test]
    fn retry_log_entry_has_no_sent_at() {
        let e = DeliveryLogEntry::new("o1", LogStatus::Retry, "again", 5);
        assert!(e.sent_at_ms.is_none());
        let e = DeliveryLogEntry::new("o1", LogStatus::Sent, "ok", 5);
        assert_eq!(e.sent_at_ms, Some(5));
    }

    #[test]
    fn filter_matches_status_and_tenant() {
        let msg = NewOutboxMessage::new(Some("rt-1"), "62811", "X", json!({}))
            .unwrap()
            .into_message(0);
        assert!(OutboxFilter::default().matches(&msg));
        assert!(
            OutboxFilter {
                status: Some(OutboxStatus::Pending),
                tenant_id: Some("rt-1".into()),
                limit: None,
            }
            .matches(&msg)
        );
        assert!(
            !OutboxFilter {
                tenant_id: Some("rt-2".into()),
                ..Default::default()
            }
            .matches(&msg)
        );
    }
}
