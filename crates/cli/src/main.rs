mod channel_commands;
mod config_commands;
mod context;
mod db_commands;
mod outbox_commands;
mod serve;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "rukun", about = "rukun: resident notifications over WhatsApp", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./rukun.toml and ~/.config/rukun/).
    #[arg(long, global = true, env = "RUKUN_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "RUKUN_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the channel and the delivery worker (default when no subcommand is given).
    Serve,
    /// Last known channel state and outbox counts.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Queue a notification.
    Enqueue {
        /// Recipient phone number in any common format.
        #[arg(long)]
        to: String,
        /// Template key, e.g. FeeBillingReminder.
        #[arg(long)]
        template: String,
        /// Template fields as a JSON object.
        #[arg(long)]
        payload: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Send a FAILED entry again.
    Retry { id: String },
    /// Outbox inspection.
    Outbox {
        #[command(subcommand)]
        action: outbox_commands::OutboxAction,
    },
    /// Print the text a template renders to.
    Render {
        #[arg(long)]
        template: String,
        #[arg(long)]
        payload: Option<String>,
    },
    /// Channel session management.
    Channel {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    // Rendering needs neither config nor database.
    if let Some(Commands::Render { template, payload }) = &cli.command {
        return outbox_commands::render(template, payload.as_deref());
    }

    let config = context::load_config(cli.config.as_deref(), cli.data_dir.as_deref())?;

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "rukun starting");
            serve::run(config).await
        },
        Some(Commands::Status { json }) => outbox_commands::status(&config, json).await,
        Some(Commands::Enqueue {
            to,
            template,
            payload,
            tenant,
        }) => {
            outbox_commands::enqueue(
                &config,
                &to,
                &template,
                payload.as_deref(),
                tenant.as_deref(),
            )
            .await
        },
        Some(Commands::Retry { id }) => outbox_commands::retry(&config, &id).await,
        Some(Commands::Outbox { action }) => outbox_commands::handle_outbox(&config, action).await,
        Some(Commands::Render { .. }) => Ok(()),
        Some(Commands::Channel { action }) => {
            channel_commands::handle_channel(&config, action).await
        },
        Some(Commands::Db { action }) => db_commands::handle_db(&config, action).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(cli.config.as_deref(), &config, action)
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory, rstest::rstest};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["rukun"])]
    #[case(&["rukun", "serve", "--json-logs"])]
    #[case(&["rukun", "enqueue", "--to", "0812", "--template", "PhoneOtpCode"])]
    #[case(&["rukun", "outbox", "list", "--status", "failed", "--limit", "5"])]
    #[case(&["rukun", "outbox", "show", "abc", "--json"])]
    #[case(&["rukun", "channel", "reset"])]
    #[case(&["rukun", "db", "migrate", "--data-dir", "/tmp/rukun"])]
    #[case(&["rukun", "config", "check", "--verbose"])]
    fn parses(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn retry_requires_an_id() {
        assert!(Cli::try_parse_from(["rukun", "retry"]).is_err());
    }
}
