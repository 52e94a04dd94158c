//! Scriptable in-process transport for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, serde_json::json};

use crate::{
    Error, Result,
    session::{ChannelSession, SessionConfig},
    snapshot::InMemorySnapshotStore,
    state::{LifecycleEvent, SessionState},
    transport::{ChannelTransport, LifecycleSender, SendReceipt},
};

pub const MOCK_ADDRESS: &str = "6281100000000";
pub const MOCK_QR: &str = "2@mock-qr";

/// What [`MockTransport::connect`] does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Emit `AUTHENTICATED` then `READY`.
    Ready { address: String },
    /// Emit a QR code and wait for the test to drive the rest.
    Qr { artifact: String },
    Authenticated,
    AuthFailure { reason: String },
    /// Refuse the handshake.
    Fail { message: String },
    /// Never return.
    Hang,
    /// Accept the handshake and emit nothing.
    Silent,
}

#[derive(Default)]
struct SendScript {
    sent: Vec<(String, String)>,
    unregistered: HashSet<String>,
    failing: HashMap<String, String>,
    delay: Option<Duration>,
    disconnect_after: Option<usize>,
    teardown_delay: Option<Duration>,
    /// Completed `disconnect` / `logout` / `discard_credentials` calls.
    teardown: Vec<&'static str>,
}

/// In-process [`ChannelTransport`] driven by the test.
pub struct MockTransport {
    behavior: Mutex<ConnectBehavior>,
    events: Mutex<Option<LifecycleSender>>,
    script: Mutex<SendScript>,
    busy_discards: AtomicU32,
    connects: AtomicU32,
    disconnects: AtomicU32,
    logouts: AtomicU32,
    discards: AtomicU32,
    next_id: AtomicU64,
}

impl MockTransport {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            events: Mutex::new(None),
            script: Mutex::new(SendScript::default()),
            busy_discards: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            logouts: AtomicU32::new(0),
            discards: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn ready() -> Self {
        Self::new(ConnectBehavior::Ready {
            address: MOCK_ADDRESS.into(),
        })
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Report `address` as not on the network.
    pub fn unregister(&self, address: &str) {
        lock(&self.script).unregistered.insert(address.to_string());
    }

    /// Make sends to `address` fail with `message`.
    pub fn fail_sends_to(&self, address: &str, message: &str) {
        lock(&self.script)
            .failing
            .insert(address.to_string(), message.to_string());
    }

    pub fn set_send_delay(&self, delay: Duration) {
        lock(&self.script).delay = Some(delay);
    }

    /// Drop the connection right after the `n`th successful send.
    pub fn disconnect_after_sends(&self, n: usize) {
        lock(&self.script).disconnect_after = Some(n);
    }

    /// Make `disconnect` and `logout` take `delay` before completing.
    pub fn set_teardown_delay(&self, delay: Duration) {
        lock(&self.script).teardown_delay = Some(delay);
    }

    /// Teardown calls in the order they completed.
    pub fn teardown_calls(&self) -> Vec<&'static str> {
        lock(&self.script).teardown.clone()
    }

    /// Fail the next `n` credential deletions as busy.
    pub fn busy_discards(&self, n: u32) {
        self.busy_discards.store(n, Ordering::SeqCst);
    }

    /// Raise a lifecycle event on the live connection. Returns `false` when
    /// nothing is connected.
    pub fn emit(&self, event: LifecycleEvent) -> bool {
        lock(&self.events)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Detach the live event sender, as if the connection outlived the
    /// session's interest in it.
    pub fn take_sender(&self) -> Option<LifecycleSender> {
        lock(&self.events).take()
    }

    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.script).sent.clone()
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn discard_count(&self) -> u32 {
        self.discards.load(Ordering::SeqCst)
    }
}

impl MockTransport {
    async fn finish_teardown(&self, call: &'static str) {
        let delay = lock(&self.script).teardown_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.script).teardown.push(call);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ChannelTransport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, events: LifecycleSender) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.behavior).clone();
        let script: Vec<LifecycleEvent> = match behavior {
            ConnectBehavior::Ready { address } => {
                vec![LifecycleEvent::Authenticated, LifecycleEvent::Ready { address }]
            },
            ConnectBehavior::Qr { artifact } => vec![LifecycleEvent::Qr { artifact }],
            ConnectBehavior::Authenticated => vec![LifecycleEvent::Authenticated],
            ConnectBehavior::AuthFailure { reason } => vec![LifecycleEvent::AuthFailure { reason }],
            ConnectBehavior::Fail { message } => return Err(Error::transport(message)),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Silent => Vec::new(),
        };
        for event in script {
            let _ = events.send(event);
        }
        *lock(&self.events) = Some(events);
        Ok(())
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt> {
        let delay = lock(&self.script).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let drop_now = {
            let mut script = lock(&self.script);
            if let Some(message) = script.failing.get(address) {
                return Err(Error::transport(message));
            }
            script.sent.push((address.to_string(), text.to_string()));
            script.disconnect_after == Some(script.sent.len())
        };

        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        if drop_now {
            self.emit(LifecycleEvent::Disconnected {
                reason: "mock connection dropped".into(),
            });
            // Let the session apply the event before the caller moves on.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(SendReceipt {
            message_id: Some(id.clone()),
            raw: json!({ "id": id, "to": address }),
        })
    }

    async fn is_registered(&self, address: &str) -> Result<bool> {
        Ok(!lock(&self.script).unregistered.contains(address))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).take();
        self.finish_teardown("disconnect").await;
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).take();
        self.finish_teardown("logout").await;
        Ok(())
    }

    async fn discard_credentials(&self) -> Result<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        lock(&self.script).teardown.push("discard");
        let busy = self
            .busy_discards
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Err(Error::credentials_busy("EBUSY: resource busy or locked"));
        }
        Ok(())
    }
}

/// Session config with short timeouts that still leave room for a test to
/// observe handshake states.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        name: "test".into(),
        send_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_secs(10),
    }
}

/// A session driven into `state` over a fresh [`MockTransport`].
pub async fn session_in(
    state: SessionState,
) -> Result<(Arc<ChannelSession>, Arc<MockTransport>)> {
    let behavior = match state {
        SessionState::Disconnected | SessionState::Connecting => ConnectBehavior::Silent,
        SessionState::QrPending => ConnectBehavior::Qr {
            artifact: MOCK_QR.into(),
        },
        SessionState::Authenticated => ConnectBehavior::Authenticated,
        SessionState::Ready => ConnectBehavior::Ready {
            address: MOCK_ADDRESS.into(),
        },
        SessionState::AuthFailure => ConnectBehavior::AuthFailure {
            reason: "credentials rejected".into(),
        },
    };
    let mock = Arc::new(MockTransport::new(behavior));
    let session = ChannelSession::new(
        test_config(),
        Arc::clone(&mock) as Arc<dyn ChannelTransport>,
        Arc::new(InMemorySnapshotStore::new()),
    );
    if state != SessionState::Disconnected {
        session.start().await?;
        if !session.wait_for(state, Duration::from_secs(2)).await {
            return Err(Error::message(format!(
                "session did not reach {state} (now {})",
                session.state()
            )));
        }
    }
    Ok((session, mock))
}
