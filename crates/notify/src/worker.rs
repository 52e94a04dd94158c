//! One delivery pass over the outbox.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    rukun_channels::{ChannelSession, Error as ChannelError},
    rukun_outbox::{OutboxMessage, OutboxStore},
    serde::Serialize,
    serde_json::json,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use {
    rukun_metrics::{counter, histogram, labels, worker as worker_metrics},
    std::time::Instant,
};

use crate::{error::Result, template};

pub use rukun_config::schema::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};

/// Failure text when the network does not know the recipient.
pub const UNREGISTERED_RECIPIENT: &str = "Nomor WA tidak terdaftar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle was still running.
    Skipped,
    /// The channel was not ready; nothing was claimed.
    Deferred,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

impl CycleReport {
    fn empty(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            claimed: 0,
            sent: 0,
            failed: 0,
        }
    }
}

/// Renders and sends pending outbox entries over a [`ChannelSession`].
pub struct DeliveryWorker {
    store: Arc<dyn OutboxStore>,
    session: Arc<ChannelSession>,
    batch_size: usize,
    busy: AtomicBool,
    /// Set while the owner is shutting down; no further entries are taken.
    halted: AtomicBool,
}

/// Clears the busy flag however the cycle ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Delivery {
    Sent,
    Failed,
    /// The entry was no longer pending when we tried to take it.
    Lost,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        session: Arc<ChannelSession>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            session,
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            busy: AtomicBool::new(false),
            halted: AtomicBool::new(false),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn session(&self) -> &Arc<ChannelSession> {
        &self.session
    }

    /// Finish the entry in hand and leave the rest of the batch pending.
    /// Stays in effect until [`DeliveryWorker::resume`].
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.halted.store(false, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Run one cycle.
    ///
    /// Per-entry failures are recorded on the entry and never end the
    /// cycle. Only store errors come back as `Err`.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("delivery cycle already running, skipping");
            return Ok(CycleReport::empty(CycleOutcome::Skipped));
        }
        let _guard = BusyGuard(&self.busy);

        #[cfg(feature = "metrics")]
        counter!(worker_metrics::CYCLES_TOTAL).increment(1);

        if !self.session.state().is_ready() {
            debug!(state = %self.session.state(), "channel not ready, deferring delivery");
            #[cfg(feature = "metrics")]
            counter!(worker_metrics::CYCLES_DEFERRED_TOTAL).increment(1);
            return Ok(CycleReport::empty(CycleOutcome::Deferred));
        }

        let batch = self.store.claim_batch(self.batch_size).await?;
        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::empty(CycleOutcome::Completed)
        };

        for msg in &batch {
            if self.is_halted() {
                info!(
                    remaining = batch.len() - report.sent - report.failed,
                    "worker stopping, leaving the rest pending"
                );
                break;
            }
            if !self.session.state().is_ready() {
                info!(
                    state = %self.session.state(),
                    remaining = batch.len() - report.sent - report.failed,
                    "channel lost mid-batch, leaving the rest pending"
                );
                break;
            }
            match self.deliver(msg).await? {
                Delivery::Sent => report.sent += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Lost => {},
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                sent = report.sent,
                failed = report.failed,
                "delivery cycle finished"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, msg: &OutboxMessage) -> Result<Delivery> {
        if !self.store.mark_sending(&msg.id).await? {
            debug!(id = %msg.id, "entry no longer pending, skipping");
            return Ok(Delivery::Lost);
        }

        #[cfg(feature = "metrics")]
        let started = Instant::now();

        let text = template::render(&msg.template_key, &msg.payload);
        let outcome = self.transmit(&msg.recipient, &text).await;

        #[cfg(feature = "metrics")]
        histogram!(worker_metrics::DELIVERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(message_id) => {
                let response = json!({ "messageId": message_id, "message": text });
                self.store.mark_sent(&msg.id, &response.to_string()).await?;
                debug!(id = %msg.id, template = %msg.template_key, "notification sent");
                #[cfg(feature = "metrics")]
                counter!(
                    worker_metrics::MESSAGES_SENT_TOTAL,
                    labels::TEMPLATE => msg.template_key.clone()
                )
                .increment(1);
                Ok(Delivery::Sent)
            },
            Err(reason) => {
                self.store.mark_failed(&msg.id, &reason).await?;
                warn!(id = %msg.id, template = %msg.template_key, %reason, "notification failed");
                #[cfg(feature = "metrics")]
                counter!(
                    worker_metrics::MESSAGES_FAILED_TOTAL,
                    labels::TEMPLATE => msg.template_key.clone()
                )
                .increment(1);
                Ok(Delivery::Failed)
            },
        }
    }

    /// Look the recipient up, then send. `Err` carries the failure text.
    async fn transmit(
        &self,
        address: &str,
        text: &str,
    ) -> std::result::Result<Option<String>, String> {
        match self.session.is_known_recipient(address).await {
            Ok(true) => {},
            Ok(false) => return Err(UNREGISTERED_RECIPIENT.to_string()),
            Err(e) => return Err(failure_text(&e)),
        }
        self.session
            .send(address, text)
            .await
            .map(|receipt| receipt.message_id)
            .map_err(|e| failure_text(&e))
    }
}

fn failure_text(err: &ChannelError) -> String {
    match err {
        ChannelError::Transport { message } if message.trim().is_empty() => "Send failed".into(),
        ChannelError::Transport { message } => message.clone(),
        other => other.to_string(),
    }
}
