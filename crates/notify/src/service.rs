//! Periodic delivery loop and the producer/operator facade.

use std::{sync::Arc, time::Duration};

use {
    rukun_channels::{ChannelSession, ChannelStatus, ResetOutcome},
    rukun_config::NotificationsConfig,
    rukun_outbox::{DeliveryLogEntry, OutboxMessage, OutboxStore},
    serde_json::Value,
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
        time::MissedTickBehavior,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use rukun_metrics::{counter, worker as worker_metrics};

use crate::{
    error::{Error, Result},
    intent::Notification,
    worker::{CycleReport, DeliveryWorker},
};

/// Drives [`DeliveryWorker::run_cycle`] on a fixed interval.
pub struct NotificationService {
    worker: Arc<DeliveryWorker>,
    interval: Duration,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

impl NotificationService {
    pub fn new(worker: Arc<DeliveryWorker>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            worker,
            interval: interval.max(Duration::from_millis(1)),
            loop_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    /// Service for `config`, or `None` when the worker is disabled.
    pub fn from_config(
        store: Arc<dyn OutboxStore>,
        session: Arc<ChannelSession>,
        config: &NotificationsConfig,
    ) -> Option<Arc<Self>> {
        if !config.worker_enabled() {
            return None;
        }
        let worker = DeliveryWorker::new(store, session, config.effective_batch_size());
        Some(Self::new(Arc::new(worker), config.worker_interval()))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn worker(&self) -> &Arc<DeliveryWorker> {
        &self.worker
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start the loop. The first cycle runs immediately.
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            return;
        }
        *self.running.write().await = true;
        self.worker.resume();

        let svc = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            svc.run_loop().await;
        }));
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.worker.batch_size(),
            "notification worker started"
        );
    }

    /// Stop the loop.
    ///
    /// A cycle in flight finishes the entry it holds and records the
    /// outcome; the rest of its batch stays `PENDING`. The loop is aborted
    /// only if that takes longer than [`NotificationService::stop_grace`].
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.worker.halt();
        self.wake_notify.notify_one();

        if let Some(mut h) = self.loop_handle.lock().await.take() {
            let grace = self.stop_grace();
            if tokio::time::timeout(grace, &mut h).await.is_err() {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "delivery cycle did not finish in time, aborting"
                );
                h.abort();
            }
        }
        info!("notification worker stopped");
    }

    /// Upper bound on one entry: a recipient lookup and a send, each bounded
    /// by the channel send timeout, plus the store writes.
    pub fn stop_grace(&self) -> Duration {
        self.worker.session().config().send_timeout * 2 + Duration::from_secs(1)
    }

    /// Run a cycle now instead of waiting for the next tick.
    pub fn wake(&self) {
        self.wake_notify.notify_one();
    }

    async fn run_loop(self: &Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                () = self.wake_notify.notified() => {
                    debug!("notification worker woken early");
                },
            }
            if !*self.running.read().await {
                break;
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        if let Err(e) = self.worker.run_cycle().await {
            warn!(error = %e, "delivery cycle aborted");
            #[cfg(feature = "metrics")]
            counter!(worker_metrics::CYCLES_ABORTED_TOTAL).increment(1);
        }
    }
}

/// Entry points for producers and operators.
///
/// Writes go straight to the outbox; the attached [`NotificationService`],
/// if any, is woken so new work does not wait for the next tick.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn OutboxStore>,
    session: Arc<ChannelSession>,
    service: Option<Arc<NotificationService>>,
}

impl Notifier {
    pub fn new(store: Arc<dyn OutboxStore>, session: Arc<ChannelSession>) -> Self {
        Self {
            store,
            session,
            service: None,
        }
    }

    #[must_use]
    pub fn with_service(mut self, service: Arc<NotificationService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    pub fn session(&self) -> &Arc<ChannelSession> {
        &self.session
    }

    /// Queue a message. `Ok(None)` when the address has no digits.
    pub async fn enqueue(
        &self,
        tenant_id: Option<&str>,
        address: &str,
        template_key: &str,
        payload: Value,
    ) -> Result<Option<String>> {
        let id = self
            .store
            .enqueue(tenant_id, address, template_key, payload)
            .await?;
        if id.is_some() {
            self.wake();
        }
        Ok(id)
    }

    /// Queue a typed notification.
    pub async fn notify(
        &self,
        tenant_id: Option<&str>,
        address: &str,
        notification: &Notification,
    ) -> Result<Option<String>> {
        let key = notification.template_key();
        self.enqueue(tenant_id, address, key.as_str(), notification.payload())
            .await
    }

    /// Move a `FAILED` entry back to `PENDING`.
    pub async fn retry(&self, id: &str) -> Result<()> {
        self.store.retry(id).await?;
        info!(id, "notification queued for retry");
        self.wake();
        Ok(())
    }

    pub fn channel_status(&self) -> ChannelStatus {
        self.session.status()
    }

    pub async fn start_channel(&self) -> Result<()> {
        self.session.start().await.map_err(Error::from)
    }

    pub async fn reset_channel(&self) -> ResetOutcome {
        self.session.reset().await
    }

    pub async fn message(&self, id: &str) -> Result<Option<OutboxMessage>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn history(&self, id: &str) -> Result<Vec<DeliveryLogEntry>> {
        Ok(self.store.logs(id).await?)
    }

    /// Run one cycle inline, bypassing the service schedule.
    pub async fn deliver_now(&self) -> Result<Option<CycleReport>> {
        match &self.service {
            Some(service) => service.worker().run_cycle().await.map(Some),
            None => Ok(None),
        }
    }

    fn wake(&self) {
        if let Some(service) = &self.service {
            service.wake();
        }
    }
}
