//! Outbox inspection and operator actions.

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    rukun_channels::{SnapshotStore, SqliteSnapshotStore},
    rukun_config::RukunConfig,
    rukun_notify::TemplateKey,
    rukun_outbox::{OutboxFilter, OutboxMessage, OutboxStatus, OutboxStore, SqliteOutboxStore},
    serde_json::json,
};

use crate::context::{self, format_ms, parse_payload};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Subcommand)]
pub enum OutboxAction {
    /// List entries, newest first.
    List {
        /// Only entries in this status (pending, sending, sent, failed).
        #[arg(long)]
        status: Option<String>,
        /// Only entries for this tenant.
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show one entry with its delivery history.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

async fn open_store(config: &RukunConfig) -> Result<(SqliteOutboxStore, sqlx::SqlitePool)> {
    let pool = context::open_database(config).await?;
    Ok((SqliteOutboxStore::with_pool(pool.clone()), pool))
}

pub async fn handle_outbox(config: &RukunConfig, action: OutboxAction) -> Result<()> {
    let (store, pool) = open_store(config).await?;
    let result = match action {
        OutboxAction::List {
            status,
            tenant,
            limit,
            json,
        } => {
            let filter = OutboxFilter {
                status: status.as_deref().map(parse_status).transpose()?,
                tenant_id: tenant,
                limit: Some(limit),
            };
            list(&store, &filter, json).await
        },
        OutboxAction::Show { id, json } => show(&store, &id, json).await,
    };
    pool.close().await;
    result
}

async fn list(store: &dyn OutboxStore, filter: &OutboxFilter, as_json: bool) -> Result<()> {
    let entries = store.list(filter).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }
    for msg in &entries {
        println!("{}", summary_line(msg));
    }
    Ok(())
}

fn summary_line(msg: &OutboxMessage) -> String {
    format!(
        "{}  {:<8} {:<16} {:<26} retries={}  {}",
        msg.id,
        msg.status.as_str(),
        msg.recipient,
        msg.template_key,
        msg.retry_count,
        format_ms(msg.updated_at_ms),
    )
}

async fn show(store: &dyn OutboxStore, id: &str, as_json: bool) -> Result<()> {
    let Some(msg) = store.get(id).await? else {
        bail!("no outbox entry with id {id}");
    };
    let logs = store.logs(id).await?;

    if as_json {
        let doc = json!({ "message": msg, "logs": logs });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Id:        {}", msg.id);
    println!("Status:    {}", msg.status.as_str());
    println!("Recipient: {}", msg.recipient);
    if let Some(tenant) = &msg.tenant_id {
        println!("Tenant:    {tenant}");
    }
    println!("Template:  {}", msg.template_key);
    println!("Payload:   {}", msg.payload);
    println!("Retries:   {}", msg.retry_count);
    println!("Created:   {}", format_ms(msg.created_at_ms));
    println!("Updated:   {}", format_ms(msg.updated_at_ms));
    println!("Text:      {}", rukun_notify::render(&msg.template_key, &msg.payload));

    if logs.is_empty() {
        println!("\nNo delivery attempts yet.");
    } else {
        println!("\nHistory:");
        for log in &logs {
            println!(
                "  {}  {:<6} {}",
                format_ms(log.created_at_ms),
                log.status.as_str(),
                log.response_text.as_deref().unwrap_or(""),
            );
        }
    }
    Ok(())
}

/// `rukun enqueue`.
pub async fn enqueue(
    config: &RukunConfig,
    to: &str,
    template: &str,
    payload: Option<&str>,
    tenant: Option<&str>,
) -> Result<()> {
    let payload = parse_payload(payload)?;
    if !TemplateKey::from(template).is_known() {
        eprintln!("warning: unknown template {template}; the generic text will be sent");
    }
    let (store, pool) = open_store(config).await?;
    let id = store.enqueue(tenant, to, template, payload).await;
    pool.close().await;

    match id? {
        Some(id) => println!("{id}"),
        None => bail!("address {to:?} has no digits; nothing was queued"),
    }
    Ok(())
}

/// `rukun retry`.
pub async fn retry(config: &RukunConfig, id: &str) -> Result<()> {
    let (store, pool) = open_store(config).await?;
    let result = store.retry(id).await;
    pool.close().await;

    match result {
        Ok(()) => {
            println!("Queued {id} for another attempt.");
            Ok(())
        },
        Err(e) if e.is_conflict() => bail!("{e}; only FAILED entries can be retried"),
        Err(e) => Err(e.into()),
    }
}

/// `rukun status`: persisted channel snapshot and outbox counts.
pub async fn status(config: &RukunConfig, as_json: bool) -> Result<()> {
    let pool = context::open_database(config).await?;
    let store = SqliteOutboxStore::with_pool(pool.clone());
    let snapshots = SqliteSnapshotStore::new(pool.clone());

    let session_name = &config.channel.session_name;
    let snapshot = snapshots.load(session_name).await?;
    let counts = store.counts().await?;
    pool.close().await;

    if as_json {
        let doc = json!({ "session": session_name, "channel": snapshot, "outbox": counts });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("Session:   {session_name}");
    match snapshot {
        Some(s) => {
            println!("State:     {}", s.state);
            if let Some(addr) = &s.connected_address {
                println!("Address:   {addr}");
            }
            if let Some(at) = s.last_connected_at {
                println!("Last seen: {}", format_ms(at));
            }
            println!("Updated:   {}", format_ms(s.updated_at));
        },
        None => println!("State:     never started"),
    }
    println!(
        "Outbox:    {} pending, {} sending, {} sent, {} failed",
        counts.pending, counts.sending, counts.sent, counts.failed
    );
    Ok(())
}

/// `rukun render`: print the text a template produces, no database needed.
pub fn render(template: &str, payload: Option<&str>) -> Result<()> {
    let payload = parse_payload(payload)?;
    let key = TemplateKey::from(template);
    if !key.is_known() {
        eprintln!("warning: unknown template {template}");
    }
    println!("{}", key.render(&payload));
    Ok(())
}

/// Accepts any case; the store's parser is case-insensitive.
pub fn parse_status(raw: &str) -> Result<OutboxStatus> {
    Ok(raw.parse()?)
}
