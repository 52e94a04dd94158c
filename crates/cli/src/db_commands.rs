use {anyhow::Result, clap::Subcommand, rukun_config::RukunConfig};

use crate::context;

#[derive(Subcommand)]
pub enum DbAction {
    /// Create the database if needed and apply pending migrations.
    Migrate,
    /// Print the database path.
    Path,
}

pub async fn handle_db(config: &RukunConfig, action: DbAction) -> Result<()> {
    match action {
        DbAction::Migrate => run_migrations(config).await,
        DbAction::Path => {
            println!("{}", config.database_path().display());
            Ok(())
        },
    }
}

async fn run_migrations(config: &RukunConfig) -> Result<()> {
    let path = config.database_path();
    println!("Running migrations for {}...", path.display());
    // Opening the database applies every crate's migrations.
    let pool = context::open_database(config).await?;
    pool.close().await;
    println!("Migrations complete.");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RukunConfig::default();
        let path = dir.path().join("data/rukun.db");
        config.database.path = Some(path.display().to_string());

        handle_db(&config, DbAction::Migrate).await.unwrap();
        assert!(path.exists());
        // Second run has nothing to apply.
        handle_db(&config, DbAction::Migrate).await.unwrap();
    }
}
