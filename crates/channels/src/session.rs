//! The long-lived channel session.
//!
//! One [`ChannelSession`] owns the connection to the messaging backend. It
//! folds lifecycle events from the transport into a [`SessionSnapshot`] one
//! at a time, persists every change, and only lets sends through while the
//! state is `READY`.

use std::{
    future::Future,
    sync::{
        Arc, Mutex as StdMutex, RwLock as StdRwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    rukun_config::ChannelConfig,
    serde::Serialize,
    tokio::{
        sync::{Mutex, mpsc, watch},
        task::JoinHandle,
        time::timeout,
    },
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use rukun_metrics::{channel as channel_metrics, counter, gauge, labels};

use crate::{
    Error, Result,
    snapshot::SnapshotStore,
    state::{ChannelStatus, LifecycleEvent, SessionSnapshot, SessionState},
    transport::{ChannelTransport, LifecycleReceiver, SendReceipt},
};

/// Attempts at deleting credential files that another process still holds.
const DISCARD_ATTEMPTS: u32 = 5;
const DISCARD_BACKOFF: Duration = Duration::from_millis(300);

/// Knobs for a single session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Logical session name; also keys the persisted snapshot.
    pub name: String,
    /// Bound on each send or recipient lookup.
    pub send_timeout: Duration,
    /// Bound on a handshake from `CONNECTING` to `READY`.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for SessionConfig {
    fn from(cfg: &ChannelConfig) -> Self {
        Self {
            name: cfg.session_name.clone(),
            send_timeout: cfg.send_timeout(),
            handshake_timeout: cfg.handshake_timeout(),
        }
    }
}

/// Result of [`ChannelSession::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    /// Whether stored credentials were deleted. When `false` the next
    /// handshake may reuse (or trip over) the old ones.
    pub credentials_discarded: bool,
}

#[derive(Default)]
struct Tasks {
    pump: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

/// Channel session state machine with a guarded send path.
pub struct ChannelSession {
    config: SessionConfig,
    transport: Arc<dyn ChannelTransport>,
    store: Arc<dyn SnapshotStore>,
    live: StdRwLock<SessionSnapshot>,
    state_tx: watch::Sender<SessionState>,
    /// Serializes start / reset / handshake teardown.
    lifecycle: Mutex<()>,
    /// Serializes snapshot commits so transitions apply in order.
    commit_lock: Mutex<()>,
    /// Bumped whenever a connection is superseded. Events carrying an older
    /// generation are dropped.
    generation: AtomicU64,
    /// Set once credentials are rejected; only `reset()` clears it.
    needs_reset: AtomicBool,
    tasks: StdMutex<Tasks>,
}

impl ChannelSession {
    /// Create a `DISCONNECTED` session without touching the store.
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn SnapshotStore>,
    ) -> Arc<Self> {
        Self::with_snapshot(config, transport, store, SessionSnapshot {
            updated_at: rukun_common::now_ms(),
            ..Default::default()
        })
    }

    /// Create a session for a freshly started process.
    ///
    /// The stored snapshot stays untouched until the first transition, so
    /// [`ChannelSession::persisted_status`] keeps reporting the last known
    /// condition. Nothing is connected yet, so the live state starts
    /// `DISCONNECTED`, except that rejected credentials stay `AUTH_FAILURE`.
    pub async fn open(
        config: SessionConfig,
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Arc<Self>> {
        let now = rukun_common::now_ms();
        let snapshot = match store.load(&config.name).await? {
            Some(previous) => {
                debug!(session = %config.name, previous = %previous.state, "loaded session snapshot");
                let state = match previous.state {
                    SessionState::AuthFailure => SessionState::AuthFailure,
                    _ => SessionState::Disconnected,
                };
                previous.with_state(state, now)
            },
            None => SessionSnapshot {
                updated_at: now,
                ..Default::default()
            },
        };
        Ok(Self::with_snapshot(config, transport, store, snapshot))
    }

    fn with_snapshot(
        config: SessionConfig,
        transport: Arc<dyn ChannelTransport>,
        store: Arc<dyn SnapshotStore>,
        snapshot: SessionSnapshot,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(snapshot.state);
        let needs_reset = snapshot.state == SessionState::AuthFailure;
        Arc::new(Self {
            config,
            transport,
            store,
            live: StdRwLock::new(snapshot),
            state_tx,
            lifecycle: Mutex::new(()),
            commit_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            needs_reset: AtomicBool::new(needs_reset),
            tasks: StdMutex::new(Tasks::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Credentials were rejected and no `reset()` has happened since.
    pub fn needs_reset(&self) -> bool {
        self.needs_reset.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        self.read_live().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read_live().clone()
    }

    /// Current state, own address while `READY` and the QR payload while
    /// `QR_PENDING`. Never blocks on the transport.
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus::from(&*self.read_live())
    }

    /// Last snapshot written to the store.
    pub async fn persisted_status(&self) -> Result<Option<SessionSnapshot>> {
        self.store.load(&self.config.name).await
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the session reaches `state`. Returns `false` on timeout.
    pub async fn wait_for(&self, state: SessionState, within: Duration) -> bool {
        let mut rx = self.subscribe();
        matches!(timeout(within, rx.wait_for(|s| *s == state)).await, Ok(Ok(_)))
    }

    /// Begin a handshake.
    ///
    /// A no-op when the session is already `READY`, a handshake is under way,
    /// or another lifecycle operation holds the session. Fails with
    /// [`Error::NeedsReset`] after an authentication failure, including
    /// once the transport has since dropped to `DISCONNECTED`. When the transport refuses
    /// the handshake (or does not answer within the handshake timeout) the
    /// session ends `DISCONNECTED` and the error is returned.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let Ok(_guard) = self.lifecycle.try_lock() else {
            debug!(session = %self.config.name, "start ignored: lifecycle operation in progress");
            return Ok(());
        };

        if self.needs_reset() {
            return Err(Error::NeedsReset);
        }
        match self.state() {
            state if state.is_ready() || state.is_handshaking() => {
                debug!(session = %self.config.name, %state, "start ignored");
                return Ok(());
            },
            _ => {},
        }

        let generation = self.next_generation();
        self.abort_tasks(true);
        self.commit(generation, |snap, now| {
            Some(snap.with_state(SessionState::Connecting, now))
        })
        .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(Arc::clone(self).pump(generation, rx));
        self.tasks().pump = Some(pump);

        info!(
            session = %self.config.name,
            transport = self.transport.name(),
            "starting channel handshake"
        );
        let after = self.config.handshake_timeout;
        let outcome = match timeout(after, self.transport.connect(tx)).await {
            Ok(result) => result,
            Err(_) => {
                #[cfg(feature = "metrics")]
                counter!(channel_metrics::TIMEOUTS_TOTAL, labels::OPERATION => "connect")
                    .increment(1);
                Err(Error::Timeout {
                    operation: "connect",
                    after,
                })
            },
        };

        match outcome {
            Ok(()) => {
                let watchdog = tokio::spawn(Arc::clone(self).watchdog(generation));
                self.tasks().watchdog = Some(watchdog);
                Ok(())
            },
            Err(e) => {
                warn!(session = %self.config.name, error = %e, "channel handshake failed");
                self.teardown().await;
                Err(e)
            },
        }
    }

    /// Tear the session down and delete stored credentials so the next
    /// `start` performs a fresh pairing. Always ends `DISCONNECTED`, and is
    /// the only way out of `AUTH_FAILURE`.
    pub async fn reset(&self) -> ResetOutcome {
        let _guard = self.lifecycle.lock().await;
        let generation = self.next_generation();
        self.abort_tasks(true);

        if let Err(e) = self.transport.logout().await {
            warn!(session = %self.config.name, error = %e, "logout during reset failed");
        }
        let credentials_discarded = self.discard_credentials().await;

        self.needs_reset.store(false, Ordering::SeqCst);
        self.commit(generation, |snap, now| {
            Some(snap.with_state(SessionState::Disconnected, now))
        })
        .await;
        info!(
            session = %self.config.name,
            credentials_discarded, "channel session reset"
        );
        ResetOutcome {
            credentials_discarded,
        }
    }

    /// Disconnect without discarding credentials. Used at process exit.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        self.abort_tasks(true);
        self.teardown().await;
        info!(session = %self.config.name, "channel session shut down");
    }

    /// Send `text` to a canonical address. Fails with [`Error::NotReady`]
    /// unless the session is `READY`; nothing reaches the transport then.
    pub async fn send(&self, address: &str, text: &str) -> Result<SendReceipt> {
        self.ensure_ready()?;
        self.bounded("send", self.transport.send_text(address, text))
            .await
    }

    /// Whether `address` exists on the network. Same readiness and timeout
    /// rules as [`ChannelSession::send`].
    pub async fn is_known_recipient(&self, address: &str) -> Result<bool> {
        self.ensure_ready()?;
        self.bounded("lookup", self.transport.is_registered(address))
            .await
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            state => Err(Error::NotReady { state }),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let after = self.config.send_timeout;
        match timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(session = %self.config.name, operation, "transport call timed out");
                #[cfg(feature = "metrics")]
                counter!(channel_metrics::TIMEOUTS_TOTAL, labels::OPERATION => operation)
                    .increment(1);
                Err(Error::Timeout { operation, after })
            },
        }
    }

    async fn discard_credentials(&self) -> bool {
        for attempt in 1..=DISCARD_ATTEMPTS {
            match self.transport.discard_credentials().await {
                Ok(()) => return true,
                Err(Error::CredentialsBusy { message }) if attempt < DISCARD_ATTEMPTS => {
                    warn!(attempt, %message, "credential files busy, retrying");
                    tokio::time::sleep(DISCARD_BACKOFF * attempt).await;
                },
                Err(e) => {
                    error!(session = %self.config.name, error = %e, "could not discard credentials");
                    return false;
                },
            }
        }
        false
    }

    /// Supersede the live connection and record `DISCONNECTED`.
    ///
    /// Leaves the watchdog handle alone: the watchdog itself calls this.
    async fn teardown(&self) {
        let generation = self.next_generation();
        self.abort_tasks(false);
        if let Err(e) = self.transport.disconnect().await {
            warn!(session = %self.config.name, error = %e, "disconnect failed");
        }
        self.commit(generation, |snap, now| {
            Some(snap.with_state(SessionState::Disconnected, now))
        })
        .await;
    }

    /// Apply events from one connection attempt, in arrival order.
    async fn pump(self: Arc<Self>, generation: u64, mut events: LifecycleReceiver) {
        while let Some(event) = events.recv().await {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(event = event.name(), "dropping event from superseded connection");
                break;
            }
            match &event {
                LifecycleEvent::Loading { percent, message } => {
                    debug!(session = %self.config.name, percent, %message, "channel loading");
                    continue;
                },
                LifecycleEvent::AuthFailure { reason } => {
                    error!(session = %self.config.name, %reason, "channel authentication failed");
                },
                LifecycleEvent::Disconnected { reason } => {
                    warn!(session = %self.config.name, %reason, "channel disconnected");
                },
                LifecycleEvent::Qr { .. } => {
                    info!(session = %self.config.name, "QR code ready to scan");
                },
                _ => {},
            }
            self.commit(generation, |snap, now| snap.apply(&event, now))
                .await;
        }
    }

    /// Abandon a handshake that has not reached `READY` in time.
    async fn watchdog(self: Arc<Self>, generation: u64) {
        tokio::time::sleep(self.config.handshake_timeout).await;
        let _guard = self.lifecycle.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation || !self.state().is_handshaking() {
            return;
        }
        warn!(
            session = %self.config.name,
            state = %self.state(),
            after_secs = self.config.handshake_timeout.as_secs(),
            "handshake did not complete in time"
        );
        #[cfg(feature = "metrics")]
        counter!(channel_metrics::TIMEOUTS_TOTAL, labels::OPERATION => "handshake").increment(1);
        self.teardown().await;
    }

    /// Replace the live snapshot with `f(current)` unless `generation` has
    /// been superseded or `f` declines. Persistence failures are logged.
    async fn commit<F>(&self, generation: u64, f: F) -> bool
    where
        F: FnOnce(&SessionSnapshot, i64) -> Option<SessionSnapshot>,
    {
        let _guard = self.commit_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        let Some(next) = f(&self.read_live(), rukun_common::now_ms()) else {
            return false;
        };

        let previous = {
            let mut live = self.live.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *live, next.clone()).state
        };
        if next.state == SessionState::AuthFailure {
            self.needs_reset.store(true, Ordering::SeqCst);
        }
        self.state_tx.send_replace(next.state);

        if previous != next.state {
            info!(
                session = %self.config.name,
                from = %previous,
                to = %next.state,
                "channel state changed"
            );
            #[cfg(feature = "metrics")]
            {
                counter!(channel_metrics::TRANSITIONS_TOTAL, labels::STATE => next.state.as_str())
                    .increment(1);
                gauge!(channel_metrics::STATE).set(f64::from(next.state.ordinal()));
            }
        }

        if let Err(e) = self.store.save(&self.config.name, &next).await {
            warn!(session = %self.config.name, error = %e, "failed to persist session snapshot");
        }
        true
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn abort_tasks(&self, include_watchdog: bool) {
        let mut tasks = self.tasks();
        if let Some(pump) = tasks.pump.take() {
            pump.abort();
        }
        if include_watchdog && let Some(watchdog) = tasks.watchdog.take() {
            watchdog.abort();
        }
    }

    fn read_live(&self) -> std::sync::RwLockReadGuard<'_, SessionSnapshot> {
        self.live.read().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
