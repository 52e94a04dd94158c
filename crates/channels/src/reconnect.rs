//! Keeps the session connected.
//!
//! The supervisor starts the first handshake immediately and, whenever the
//! session falls back to `DISCONNECTED`, starts another after an exponential
//! backoff. After an authentication failure it waits, even once the
//! transport has dropped to `DISCONNECTED`, until an operator resets the
//! session.

use std::{sync::Arc, time::Duration};

use {
    rukun_config::ReconnectConfig,
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use rukun_metrics::{channel as channel_metrics, counter};

use crate::{Error, session::ChannelSession, state::SessionState};

/// Backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// Safety poll; state changes wake the supervisor sooner.
    pub check_interval: Duration,
}

impl Backoff {
    /// Delay before the `attempt`th consecutive reconnect (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(cfg.initial_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms.max(cfg.initial_delay_ms)),
            check_interval: Duration::from_millis(cfg.check_interval_ms.max(1)),
        }
    }
}

/// Background task that restarts the session after it drops.
pub struct ReconnectSupervisor {
    session: Arc<ChannelSession>,
    backoff: Backoff,
    running: RwLock<bool>,
    wake_notify: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    pub fn new(session: Arc<ChannelSession>, backoff: Backoff) -> Arc<Self> {
        Arc::new(Self {
            session,
            backoff,
            running: RwLock::new(false),
            wake_notify: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        })
    }

    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.run().await;
        });
        *self.handle.lock().await = Some(handle);
        info!(session = self.session.name(), "reconnect supervisor started");
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();
        if let Some(h) = self.handle.lock().await.take() {
            h.abort();
        }
        info!(session = self.session.name(), "reconnect supervisor stopped");
    }

    /// Re-evaluate now instead of at the next poll.
    pub fn wake(&self) {
        self.wake_notify.notify_one();
    }

    async fn run(self: &Arc<Self>) {
        let mut states = self.session.subscribe();
        let mut attempt: u32 = 0;
        let mut first = true;
        let mut reported_auth_failure = false;

        loop {
            if !*self.running.read().await {
                break;
            }

            if self.session.needs_reset() {
                if !reported_auth_failure {
                    warn!(
                        session = self.session.name(),
                        "authentication failed; waiting for a channel reset"
                    );
                    reported_auth_failure = true;
                }
                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    },
                    () = tokio::time::sleep(self.backoff.check_interval) => {},
                    () = self.wake_notify.notified() => {},
                }
                continue;
            }
            reported_auth_failure = false;

            match self.session.state() {
                SessionState::Ready => {
                    if attempt > 0 {
                        debug!(attempts = attempt, "session ready, backoff reset");
                    }
                    attempt = 0;
                },
                SessionState::Disconnected => {
                    if !first {
                        let delay = self.backoff.delay(attempt.saturating_add(1));
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {},
                            () = self.wake_notify.notified() => {},
                        }
                        if !*self.running.read().await {
                            break;
                        }
                        if self.session.state() != SessionState::Disconnected {
                            continue;
                        }
                    }
                    first = false;
                    attempt = attempt.saturating_add(1);
                    #[cfg(feature = "metrics")]
                    counter!(channel_metrics::RECONNECT_ATTEMPTS_TOTAL).increment(1);
                    match self.session.start().await {
                        Ok(()) => {},
                        Err(Error::NeedsReset) => {},
                        Err(e) => {
                            warn!(session = self.session.name(), attempt, error = %e, "reconnect attempt failed");
                        },
                    }
                    continue;
                },
                _ => {},
            }

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
                () = tokio::time::sleep(self.backoff.check_interval) => {},
                () = self.wake_notify.notified() => {},
            }
        }
    }
}
