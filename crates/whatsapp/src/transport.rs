//! [`ChannelTransport`] over the WhatsApp Web sidecar.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    rukun_channels::{ChannelTransport, Error, LifecycleSender, Result, SendReceipt},
    rukun_config::ChannelConfig,
    serde_json::json,
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::{
    credentials,
    process::{SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::SidecarClient,
    types::{GatewayRequest, SidecarEvent, chat_id},
};

/// Attempts at reaching a sidecar that was just spawned (500 ms apart).
const CONNECT_ATTEMPTS: u32 = 10;

/// Settings for [`WhatsAppTransport`].
#[derive(Debug, Clone)]
pub struct WhatsAppTransportConfig {
    pub session_name: String,
    pub port: u16,
    /// Absolute credential root; the session lives in `session-<name>/`.
    pub auth_dir: PathBuf,
    /// Explicit sidecar directory; discovered when `None`.
    pub sidecar_dir: Option<PathBuf>,
    /// Spawn the sidecar instead of expecting one on `port`.
    pub auto_start: bool,
    /// Bound on waiting for the sidecar to confirm a stop or logout.
    pub teardown_timeout: Duration,
}

impl From<&ChannelConfig> for WhatsAppTransportConfig {
    fn from(cfg: &ChannelConfig) -> Self {
        let wa = &cfg.whatsapp;
        Self {
            session_name: cfg.session_name.clone(),
            port: wa.sidecar_port,
            auth_dir: credentials::resolve_auth_dir(&wa.auth_dir),
            sidecar_dir: (!wa.sidecar_dir.trim().is_empty()).then(|| PathBuf::from(&wa.sidecar_dir)),
            auto_start: wa.auto_start_sidecar,
            teardown_timeout: cfg.send_timeout(),
        }
    }
}

/// WhatsApp Web transport.
pub struct WhatsAppTransport {
    config: WhatsAppTransportConfig,
    client: Mutex<Option<Arc<SidecarClient>>>,
    process: Mutex<Option<SidecarProcess>>,
}

impl WhatsAppTransport {
    pub fn new(config: WhatsAppTransportConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            process: Mutex::new(None),
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        credentials::session_dir(&self.config.auth_dir, &self.config.session_name)
    }

    /// Stop the sidecar process if this transport spawned it.
    pub async fn shutdown(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close();
        }
        if let Some(mut process) = self.process.lock().await.take()
            && let Err(e) = process.stop().await
        {
            warn!(error = %e, "failed to stop WhatsApp sidecar");
        }
    }

    /// Connected client, spawning the sidecar first when configured to.
    async fn ensure_client(&self) -> Result<Arc<SidecarClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref()
            && client.is_connected()
        {
            return Ok(Arc::clone(client));
        }

        if self.config.auto_start {
            self.ensure_process().await?;
        }
        let client = SidecarClient::connect_with_retry(
            self.config.port,
            &self.config.session_name,
            CONNECT_ATTEMPTS,
        )
        .await?;
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn ensure_process(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if let Some(proc) = process.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!("WhatsApp sidecar died, restarting");
        }

        let sidecar_dir = find_sidecar_dir(self.config.sidecar_dir.as_deref())
            .map_err(|e| Error::transport(format!("{e:#}")))?;
        let spawned = start_sidecar(&SidecarConfig {
            sidecar_dir,
            port: self.config.port,
            auth_dir: self.config.auth_dir.clone(),
        })
        .await
        .map_err(|e| Error::transport(format!("{e:#}")))?;
        *process = Some(spawned);
        Ok(())
    }

    /// Ask the sidecar to stop (or log out) the session and wait for its
    /// answer. Lifecycle frames are detached first; the session has already
    /// moved on from this connection.
    async fn end_session(&self, logout: bool) -> Result<()> {
        let client = self.client.lock().await.clone();
        let Some(client) = client else {
            return Ok(());
        };
        client.attach(None);
        if !client.is_connected() {
            return Ok(());
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let session = self.config.session_name.clone();
        let (operation, request) = if logout {
            ("logout", GatewayRequest::Logout {
                request_id: request_id.clone(),
                session,
            })
        } else {
            ("stop", GatewayRequest::Stop {
                request_id: request_id.clone(),
                session,
            })
        };

        let after = self.config.teardown_timeout;
        let reply = tokio::time::timeout(after, client.request(&request_id, &request))
            .await
            .map_err(|_| Error::Timeout { operation, after })??;

        match reply {
            SidecarEvent::StopResult {
                error: Some(error), ..
            }
            | SidecarEvent::LogoutResult {
                error: Some(error), ..
            } => Err(Error::transport(error)),
            SidecarEvent::StopResult { .. } | SidecarEvent::LogoutResult { .. } => {
                info!(session = %self.config.session_name, operation, "sidecar session ended");
                Ok(())
            },
            other => Err(Error::transport(format!("unexpected sidecar reply: {other:?}"))),
        }
    }

    /// Client for a send or lookup. Never spawns anything.
    async fn live_client(&self) -> Result<Arc<SidecarClient>> {
        self.client
            .lock()
            .await
            .as_ref()
            .filter(|c| c.is_connected())
            .cloned()
            .ok_or_else(|| Error::transport("sidecar not connected"))
    }
}

#[async_trait]
impl ChannelTransport for WhatsAppTransport {
    fn name(&self) -> &str {
        "whatsapp-web"
    }

    async fn connect(&self, events: LifecycleSender) -> Result<()> {
        let client = self.ensure_client().await?;
        client.attach(Some(events));
        client.send(&GatewayRequest::Login {
            session: self.config.session_name.clone(),
            auth_dir: self.config.auth_dir.display().to_string(),
        })?;
        info!(session = %self.config.session_name, "login requested");
        Ok(())
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<SendReceipt> {
        let to = chat_id(address).ok_or_else(|| Error::transport("Nomor WA tidak valid"))?;
        let client = self.live_client().await?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let reply = client
            .request(&request_id, &GatewayRequest::SendMessage {
                request_id: request_id.clone(),
                session: self.config.session_name.clone(),
                to: to.clone(),
                text: text.to_string(),
            })
            .await?;

        match reply {
            SidecarEvent::SendResult {
                success: true,
                message_id,
                ..
            } => Ok(SendReceipt {
                raw: json!({ "id": message_id, "to": to }),
                message_id,
            }),
            SidecarEvent::SendResult { error, .. } => Err(Error::transport(
                error.unwrap_or_else(|| "Send failed".into()),
            )),
            other => Err(Error::transport(format!("unexpected sidecar reply: {other:?}"))),
        }
    }

    async fn is_registered(&self, address: &str) -> Result<bool> {
        let Some(to) = chat_id(address) else {
            return Ok(false);
        };
        let client = self.live_client().await?;
        let request_id = uuid::Uuid::new_v4().to_string();
        let reply = client
            .request(&request_id, &GatewayRequest::CheckNumber {
                request_id: request_id.clone(),
                session: self.config.session_name.clone(),
                to,
            })
            .await?;

        match reply {
            SidecarEvent::CheckNumberResult {
                error: Some(error), ..
            } => Err(Error::transport(error)),
            SidecarEvent::CheckNumberResult { registered, .. } => Ok(registered),
            other => Err(Error::transport(format!("unexpected sidecar reply: {other:?}"))),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.end_session(false).await
    }

    async fn logout(&self) -> Result<()> {
        self.end_session(true).await
    }

    async fn discard_credentials(&self) -> Result<()> {
        credentials::discard(&self.session_dir()).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::sidecar::tests::fake_sidecar,
        rukun_channels::LifecycleEvent,
        serde_json::{Value, json},
        std::sync::Mutex as StdMutex,
        tokio::sync::mpsc,
    };

    fn config(port: u16, auth_dir: PathBuf) -> WhatsAppTransportConfig {
        WhatsAppTransportConfig {
            session_name: "portal-rt".into(),
            port,
            auth_dir,
            sidecar_dir: None,
            auto_start: false,
            teardown_timeout: Duration::from_secs(2),
        }
    }

    fn scripted(req: Value) -> Vec<Value> {
        match req["type"].as_str().unwrap_or_default() {
            "login" => vec![
                json!({"type": "authenticated", "session": "portal-rt"}),
                json!({"type": "ready", "session": "portal-rt", "phone": "6281100"}),
            ],
            "send_message" if req["to"] == "62899@c.us" => vec![json!({
                "type": "send_result",
                "request_id": req["request_id"],
                "success": false,
                "error": "chat not found",
            })],
            "send_message" => vec![json!({
                "type": "send_result",
                "request_id": req["request_id"],
                "success": true,
                "message_id": "true_62811@c.us_3EB0",
            })],
            "check_number" => vec![json!({
                "type": "check_number_result",
                "request_id": req["request_id"],
                "registered": req["to"] != "62899@c.us",
            })],
            kind @ ("stop" | "logout") => vec![json!({
                "type": format!("{kind}_result"),
                "request_id": req["request_id"],
            })],
            _ => vec![],
        }
    }

    async fn connected() -> (WhatsAppTransport, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let port = fake_sidecar(vec![], scripted).await;
        let tmp = std::env::temp_dir();
        let transport = WhatsAppTransport::new(config(port, tmp));
        let (tx, rx) = mpsc::unbounded_channel();
        transport.connect(tx).await.unwrap();
        (transport, rx)
    }

    #[test]
    fn config_from_channel_settings() {
        let mut channel = ChannelConfig::default();
        channel.whatsapp.auth_dir = "/srv/wa".into();
        let cfg = WhatsAppTransportConfig::from(&channel);
        assert_eq!(cfg.auth_dir, PathBuf::from("/srv/wa"));
        assert_eq!(cfg.session_name, "portal-rt");
        assert!(cfg.sidecar_dir.is_none());
        assert_eq!(
            WhatsAppTransport::new(cfg).session_dir(),
            PathBuf::from("/srv/wa/session-portal-rt")
        );
    }

    #[tokio::test]
    async fn login_produces_lifecycle_events() {
        let (_transport, mut rx) = connected().await;
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, LifecycleEvent::Authenticated);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, LifecycleEvent::Ready {
            address: "6281100".into()
        });
    }

    #[tokio::test]
    async fn send_uses_chat_id_and_returns_ack_id() {
        let (transport, _rx) = connected().await;
        let receipt = transport.send_text("62811", "halo").await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("true_62811@c.us_3EB0"));
        assert_eq!(receipt.raw["to"], "62811@c.us");
    }

    #[tokio::test]
    async fn send_failure_carries_sidecar_error() {
        let (transport, _rx) = connected().await;
        let err = transport.send_text("62899", "halo").await.unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }

    #[tokio::test]
    async fn check_number() {
        let (transport, _rx) = connected().await;
        assert!(transport.is_registered("62811").await.unwrap());
        assert!(!transport.is_registered("62899").await.unwrap());
        assert!(!transport.is_registered("").await.unwrap());
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let transport = WhatsAppTransport::new(config(1, std::env::temp_dir()));
        assert!(transport.send_text("62811", "x").await.is_err());
        transport.disconnect().await.unwrap();
    }

    /// Transport over a sidecar that records every request type it sees.
    async fn recorded(
        reply: fn(Value) -> Vec<Value>,
        teardown_timeout: Duration,
    ) -> (WhatsAppTransport, Arc<StdMutex<Vec<String>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let port = fake_sidecar(vec![], move |req: Value| {
            log.lock()
                .unwrap()
                .push(req["type"].as_str().unwrap_or_default().to_string());
            reply(req)
        })
        .await;
        let transport = WhatsAppTransport::new(WhatsAppTransportConfig {
            teardown_timeout,
            ..config(port, std::env::temp_dir())
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.connect(tx).await.unwrap();
        (transport, seen)
    }

    #[tokio::test]
    async fn disconnect_stops_and_logout_unlinks() {
        let (transport, seen) = recorded(scripted, Duration::from_secs(2)).await;
        transport.disconnect().await.unwrap();
        transport.logout().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["login", "stop", "logout"]);
    }

    #[tokio::test]
    async fn logout_waits_for_the_sidecar_to_answer() {
        let silent = |req: Value| match req["type"].as_str() {
            Some("logout") => vec![],
            _ => scripted(req),
        };
        let (transport, seen) = recorded(silent, Duration::from_millis(100)).await;
        let err = transport.logout().await.unwrap_err();
        assert!(matches!(err, Error::Timeout {
            operation: "logout",
            ..
        }));
        assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("logout"));
    }

    #[tokio::test]
    async fn logout_failure_is_reported() {
        let failing = |req: Value| match req["type"].as_str() {
            Some("logout") => vec![json!({
                "type": "logout_result",
                "request_id": req["request_id"],
                "error": "EBUSY: session files locked",
            })],
            _ => scripted(req),
        };
        let (transport, _seen) = recorded(failing, Duration::from_secs(2)).await;
        let err = transport.logout().await.unwrap_err();
        assert!(err.to_string().contains("EBUSY"));
    }

    #[tokio::test]
    async fn discard_deletes_session_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = WhatsAppTransport::new(config(1, tmp.path().to_path_buf()));
        std::fs::create_dir_all(transport.session_dir()).unwrap();
        transport.discard_credentials().await.unwrap();
        assert!(!transport.session_dir().exists());
    }
}
