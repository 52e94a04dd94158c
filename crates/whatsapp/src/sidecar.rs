//! WebSocket client for the sidecar.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    rukun_channels::{Error, LifecycleEvent, LifecycleSender, Result},
    tokio::{
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::types::{GatewayRequest, SidecarEvent};

pub const DEFAULT_SIDECAR_PORT: u16 = 3291;

/// Delay between connection attempts while the sidecar boots.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Live connection to the sidecar.
///
/// Lifecycle frames for the configured session are forwarded to whichever
/// [`LifecycleSender`] is attached; result frames complete the request that
/// carries the same `request_id`.
pub struct SidecarClient {
    session: String,
    write_tx: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, oneshot::Sender<SidecarEvent>>>,
    events: RwLock<Option<LifecycleSender>>,
    connected: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SidecarClient {
    /// Connect to `ws://127.0.0.1:<port>`.
    pub async fn connect(port: u16, session: &str) -> Result<Arc<Self>> {
        Self::connect_url(&format!("ws://127.0.0.1:{port}"), session).await
    }

    pub async fn connect_url(url: &str, session: &str) -> Result<Arc<Self>> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| Error::external(format!("failed to connect to sidecar at {url}"), e))?;
        let (mut sink, mut stream) = ws.split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();

        let client = Arc::new(Self {
            session: session.to_string(),
            write_tx,
            pending: Mutex::new(HashMap::new()),
            events: RwLock::new(None),
            connected: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(async move {
            while let Some(text) = write_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "sidecar write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_client = Arc::clone(&client);
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_client.dispatch(text.as_str()),
                    Ok(Message::Close(_)) => {
                        debug!("sidecar closed the connection");
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        warn!(error = %e, "sidecar read failed");
                        break;
                    },
                }
            }
            reader_client.on_closed();
        });

        lock(&client.tasks).extend([writer, reader]);
        info!(url, "connected to WhatsApp sidecar");
        Ok(client)
    }

    /// Connect, retrying while the sidecar process is still starting.
    pub async fn connect_with_retry(port: u16, session: &str, attempts: u32) -> Result<Arc<Self>> {
        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            match Self::connect(port, session).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    debug!(attempt, error = %e, "sidecar not reachable yet");
                    last_err = Some(e);
                    tokio::time::sleep(RETRY_DELAY).await;
                },
            }
        }
        Err(last_err.unwrap_or_else(|| Error::transport("sidecar not reachable")))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Route lifecycle frames to `events` (or drop them with `None`).
    pub fn attach(&self, events: Option<LifecycleSender>) {
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = events;
    }

    /// Fire-and-forget request.
    pub fn send(&self, request: &GatewayRequest) -> Result<()> {
        let text = serde_json::to_string(request)
            .map_err(|e| Error::external("failed to encode sidecar request", e))?;
        self.write_tx
            .send(text)
            .map_err(|_| Error::transport("sidecar connection closed"))
    }

    /// Send a request and wait for the result frame with `request_id`.
    ///
    /// Waits indefinitely; callers bound it with their own timeout. A
    /// cancelled wait unregisters itself.
    pub async fn request(&self, request_id: &str, request: &GatewayRequest) -> Result<SidecarEvent> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.to_string(), tx);
        let _guard = PendingGuard {
            client: self,
            request_id,
        };
        self.send(request)?;
        rx.await
            .map_err(|_| Error::transport("sidecar connection closed before replying"))
    }

    /// Stop the background tasks.
    pub fn close(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
    }

    fn dispatch(&self, text: &str) {
        let event: SidecarEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unparseable sidecar frame");
                return;
            },
        };

        if let Some(request_id) = event.request_id() {
            let waiter = lock(&self.pending).remove(request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(event);
                },
                None => debug!(request_id, "result for an abandoned request"),
            }
            return;
        }

        if let SidecarEvent::Error { session, error } = &event {
            warn!(?session, error, "sidecar error");
            return;
        }

        if event.session().is_some_and(|s| s != self.session) {
            debug!(session = ?event.session(), "frame for another session ignored");
            return;
        }
        if let Some(lifecycle) = event.into_lifecycle() {
            self.forward(lifecycle);
        }
    }

    fn on_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.pending).clear();
        self.forward(LifecycleEvent::Disconnected {
            reason: "sidecar connection closed".into(),
        });
    }

    fn forward(&self, event: LifecycleEvent) {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = events.as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl Drop for SidecarClient {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

struct PendingGuard<'a> {
    client: &'a SidecarClient,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.client.pending).remove(self.request_id);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
