//! Shared setup for commands that touch the database or the channel.

use std::{path::Path, str::FromStr, sync::Arc};

use {
    anyhow::{Context as _, Result, bail},
    chrono::{DateTime, Local},
    rukun_channels::{ChannelSession, ChannelTransport, SessionConfig, SqliteSnapshotStore},
    rukun_config::RukunConfig,
    rukun_whatsapp::{WhatsAppTransport, WhatsAppTransportConfig},
    serde_json::Value,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::debug,
};

/// Load configuration, honouring `--config` and `--data-dir`.
pub fn load_config(path: Option<&Path>, data_dir: Option<&Path>) -> Result<RukunConfig> {
    if let Some(dir) = data_dir {
        rukun_config::set_data_dir(dir.to_path_buf());
    }
    match path {
        Some(path) => {
            let mut config = rukun_config::load_config(path)?;
            rukun_config::apply_env_overrides(&mut config);
            Ok(config)
        },
        None => Ok(rukun_config::discover_and_load()),
    }
}

/// Open (creating if needed) the SQLite database and bring its schema up
/// to date.
pub async fn open_database(config: &RukunConfig) -> Result<SqlitePool> {
    let path = config.database_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let url = format!("sqlite:{}", path.display());
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    debug!(path = %path.display(), "database opened");

    migrate(&pool).await?;
    Ok(pool)
}

/// Run every crate's migrations against `pool`.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    rukun_outbox::run_migrations(pool)
        .await
        .map_err(|e| anyhow::anyhow!("outbox migrations failed: {e}"))?;
    rukun_channels::run_migrations(pool)
        .await
        .map_err(|e| anyhow::anyhow!("channel migrations failed: {e}"))?;
    Ok(())
}

/// The configured WhatsApp transport and a session over it, opened from the
/// persisted snapshot.
pub async fn open_session(
    config: &RukunConfig,
    pool: &SqlitePool,
) -> Result<(Arc<WhatsAppTransport>, Arc<ChannelSession>)> {
    let transport = Arc::new(WhatsAppTransport::new(WhatsAppTransportConfig::from(
        &config.channel,
    )));
    let session = ChannelSession::open(
        SessionConfig::from(&config.channel),
        Arc::clone(&transport) as Arc<dyn ChannelTransport>,
        Arc::new(SqliteSnapshotStore::new(pool.clone())),
    )
    .await?;
    Ok((transport, session))
}

/// `--payload` argument as a JSON object. Absent means `{}`.
pub fn parse_payload(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    if !value.is_object() {
        bail!("payload must be a JSON object");
    }
    Ok(value)
}

/// Local wall-clock rendering of a millisecond timestamp.
pub fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| {
            t.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".into())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[test]
    fn payload_defaults_to_empty_object() {
        assert_eq!(parse_payload(None).unwrap(), json!({}));
        assert_eq!(
            parse_payload(Some(r#"{"amount": 5000}"#)).unwrap(),
            json!({ "amount": 5000 })
        );
    }

    #[rstest]
    #[case("[1, 2]", "JSON object")]
    #[case("{amount:", "not valid JSON")]
    fn payload_rejects(#[case] raw: &str, #[case] message: &str) {
        let err = parse_payload(Some(raw)).unwrap_err();
        assert!(err.to_string().contains(message), "{err}");
    }

    #[test]
    fn format_ms_renders_or_dashes() {
        assert_eq!(format_ms(i64::MAX), "-");
        assert_eq!(format_ms(0).len(), "1970-01-01 00:00:00".len());
    }

    #[test]
    fn load_config_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rukun.toml");
        std::fs::write(&path, "[notifications]\nbatch_size = 25\n").unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.notifications.batch_size, 25);
    }

    #[tokio::test]
    async fn database_is_created_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RukunConfig::default();
        config.database.path = Some(dir.path().join("nested/rukun.db").display().to_string());

        let pool = open_database(&config).await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"notification_outbox"));
        assert!(names.contains(&"notification_log"));
        assert!(names.contains(&"channel_session"));
        // Idempotent.
        migrate(&pool).await.unwrap();
    }
}
