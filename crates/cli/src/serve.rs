//! `rukun serve`: the long-running delivery process.

use std::sync::Arc;

use {
    anyhow::Result,
    rukun_channels::{Backoff, ChannelSession, ReconnectSupervisor, SessionState},
    rukun_config::RukunConfig,
    rukun_notify::NotificationService,
    rukun_outbox::{OutboxStore, SqliteOutboxStore},
    tokio::task::JoinHandle,
    tracing::{info, warn},
};

use crate::context;

/// Log text for entries found mid-send at startup.
const INTERRUPTED_REASON: &str = "interrupted: process stopped while sending";

pub async fn run(config: RukunConfig) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _metrics = init_metrics(&config)?;

    let pool = context::open_database(&config).await?;
    info!(path = %config.database_path().display(), "database ready");

    let outbox: Arc<dyn OutboxStore> = Arc::new(SqliteOutboxStore::with_pool(pool.clone()));
    let recovered = outbox.recover_interrupted(INTERRUPTED_REASON).await?;
    if recovered > 0 {
        warn!(
            recovered,
            "entries were left mid-send by the previous run and marked failed; retry them to resend"
        );
    }

    let (transport, session) = context::open_session(&config, &pool).await?;
    let pairing = watch_pairing(Arc::clone(&session));

    let supervisor = ReconnectSupervisor::new(
        Arc::clone(&session),
        Backoff::from(&config.channel.reconnect),
    );
    supervisor.start().await;

    let service = NotificationService::from_config(
        Arc::clone(&outbox),
        Arc::clone(&session),
        &config.notifications,
    );
    match &service {
        Some(service) => service.start().await,
        None => info!("notification worker disabled; entries stay queued"),
    }

    info!(
        session = %session.name(),
        transport = session.transport_name(),
        "rukun running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(service) = &service {
        service.stop().await;
    }
    supervisor.stop().await;
    pairing.abort();
    session.shutdown().await;
    transport.shutdown().await;
    pool.close().await;
    info!("stopped");
    Ok(())
}

/// Log each new pairing QR so an operator can scan it from the logs.
fn watch_pairing(session: Arc<ChannelSession>) -> JoinHandle<()> {
    let mut states = session.subscribe();
    tokio::spawn(async move {
        let mut last: Option<String> = None;
        while states.changed().await.is_ok() {
            let status = session.status();
            if status.state != SessionState::QrPending {
                last = None;
                continue;
            }
            if let Some(qr) = status.qr_artifact
                && last.as_deref() != Some(qr.as_str())
            {
                info!(qr = %qr, "pairing required: scan this code or run `rukun channel login`");
                last = Some(qr);
            }
        }
    })
}

#[cfg(feature = "metrics")]
fn init_metrics(config: &RukunConfig) -> Result<rukun_metrics::MetricsHandle> {
    let listen = match config.metrics.listen.parse::<std::net::SocketAddr>() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!(listen = %config.metrics.listen, error = %e, "invalid metrics listen address, exporter disabled");
            None
        },
    };
    let handle = rukun_metrics::init_metrics(rukun_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        listen,
        global_labels: vec![("session".into(), config.channel.session_name.clone())],
    })?;
    Ok(handle)
}
