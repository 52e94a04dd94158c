//! CLI subcommands for the messaging channel.

use std::{sync::Arc, time::Duration};

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    rukun_channels::{ChannelSession, SessionState},
    rukun_config::RukunConfig,
    tokio::time::{Instant, timeout_at},
    tracing::info,
};

use crate::context;

#[derive(Subcommand)]
pub enum ChannelAction {
    /// Link the account: print the pairing QR and wait until the session is ready.
    Login {
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 180)]
        wait_secs: u64,
    },
    /// Log out and delete stored credentials. The next start pairs from scratch.
    Reset,
}

pub async fn handle_channel(config: &RukunConfig, action: ChannelAction) -> Result<()> {
    let pool = context::open_database(config).await?;
    let (transport, session) = context::open_session(config, &pool).await?;

    let result = match action {
        ChannelAction::Login { wait_secs } => {
            login(&session, Duration::from_secs(wait_secs)).await
        },
        ChannelAction::Reset => {
            let outcome = session.reset().await;
            println!("{}", reset_message(outcome.credentials_discarded));
            Ok(())
        },
    };

    session.shutdown().await;
    transport.shutdown().await;
    pool.close().await;
    result
}

const AUTH_FAILED: &str = "authentication failed; run `rukun channel reset` and log in again";

async fn login(session: &Arc<ChannelSession>, wait: Duration) -> Result<()> {
    let deadline = Instant::now() + wait;
    let mut states = session.subscribe();
    if session.needs_reset() {
        bail!(AUTH_FAILED);
    }
    session.start().await?;

    let mut shown_qr: Option<String> = None;
    loop {
        if session.needs_reset() {
            bail!(AUTH_FAILED);
        }
        let status = session.status();
        match status.state {
            SessionState::Ready => {
                println!(
                    "Linked as {}.",
                    status.connected_address.as_deref().unwrap_or("unknown number")
                );
                return Ok(());
            },
            SessionState::QrPending => {
                if let Some(qr) = status.qr_artifact
                    && shown_qr.as_deref() != Some(qr.as_str())
                {
                    println!("Scan this pairing code with WhatsApp (Linked devices):\n{qr}\n");
                    shown_qr = Some(qr);
                }
            },
            SessionState::Disconnected => {
                info!("session disconnected during login, starting again");
                session.start().await?;
            },
            SessionState::Connecting | SessionState::Authenticated | SessionState::AuthFailure => {},
        }

        match timeout_at(deadline, states.changed()).await {
            Ok(Ok(())) => {},
            Ok(Err(_)) => bail!("session closed"),
            Err(_) => bail!("not linked after {}s (state: {})", wait.as_secs(), session.state()),
        }
    }
}

fn reset_message(credentials_discarded: bool) -> &'static str {
    if credentials_discarded {
        "Channel reset. Stored credentials were deleted; the next start shows a new pairing code."
    } else {
        "Channel reset, but stored credentials could not be deleted. Stop other rukun processes \
         and run the reset again."
    }
}
