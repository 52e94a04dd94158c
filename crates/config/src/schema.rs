//! Config schema types (database, notifications, channel, metrics).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Bounds applied to `notifications.batch_size`.
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RukunConfig {
    pub database: DatabaseConfig,
    pub notifications: NotificationsConfig,
    pub channel: ChannelConfig,
    pub metrics: MetricsConfig,
}

impl RukunConfig {
    /// SQLite file holding the outbox, delivery log and session snapshot.
    ///
    /// Falls back to `<data_dir>/rukun.db` when `database.path` is unset.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        match self.database.path.as_deref() {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => crate::loader::data_dir().join("rukun.db"),
        }
    }
}

/// SQLite storage location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file. Defaults to `<data_dir>/rukun.db`.
    pub path: Option<String>,
}

/// Delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Whether `serve` runs the delivery worker at all.
    pub enabled: bool,
    /// Period between delivery cycles. `0` disables the worker.
    pub worker_interval_ms: u64,
    /// Entries claimed per cycle.
    pub batch_size: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_interval_ms: 15_000,
            batch_size: 10,
        }
    }
}

impl NotificationsConfig {
    /// Whether the periodic worker should run.
    #[must_use]
    pub fn worker_enabled(&self) -> bool {
        self.enabled && self.worker_interval_ms > 0
    }

    #[must_use]
    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }

    /// `batch_size` clamped to the supported range.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }
}

/// Outbound messaging channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Logical identity of the channel session. Also names the persisted
    /// credential directory (`<auth_dir>/session-<session_name>`).
    pub session_name: String,
    /// Upper bound for a single send or recipient lookup.
    pub send_timeout_secs: u64,
    /// Upper bound for a handshake, including waiting for a QR scan.
    pub handshake_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
    pub whatsapp: WhatsAppConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            session_name: "portal-rt".into(),
            send_timeout_secs: 30,
            handshake_timeout_secs: 120,
            reconnect: ReconnectConfig::default(),
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Backoff used by the reconnect supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// How often a healthy session is polled for an unexpected disconnect.
    pub check_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 60_000,
            check_interval_ms: 10_000,
        }
    }
}

/// WhatsApp Web sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Directory holding persisted session credentials. Relative paths are
    /// resolved against the working directory.
    pub auth_dir: String,
    /// Directory of the Node sidecar. Empty means auto-discovery.
    pub sidecar_dir: String,
    /// Local WebSocket port the sidecar listens on.
    pub sidecar_port: u16,
    /// Spawn the sidecar from `serve` instead of expecting it to be running.
    pub auto_start_sidecar: bool,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            auth_dir: ".wa_auth".into(),
            sidecar_dir: String::new(),
            sidecar_port: 3291,
            auto_start_sidecar: true,
        }
    }
}

/// Prometheus exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address the exporter's HTTP listener binds to.
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9464".into(),
        }
    }
}
