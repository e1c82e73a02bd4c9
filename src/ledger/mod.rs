pub mod firestore;
pub mod in_memory;
pub mod sqlite;
pub mod traits;

pub use firestore::FirestoreUsageLedger;
pub use in_memory::InMemoryUsageLedger;
pub use sqlite::SqliteUsageLedger;
pub use traits::{UsageLedger, UsageRecord};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, LedgerConfig};
use crate::infra::{Clock, SystemClock};
use crate::lifecycle::QuotaPolicy;
use crate::LedgerCommands;

/// Factory: create the configured ledger backend.
pub fn create_ledger(config: &LedgerConfig, data_dir: &Path) -> Result<Arc<dyn UsageLedger>> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "firestore" => Ok(Arc::new(FirestoreUsageLedger::new(
            &config.firestore.api_url,
            &config.firestore.project,
            &config.firestore.database,
            &config.firestore.collection,
            config.reference_timezone()?,
            config.firestore.access_token.as_deref(),
        ))),
        "sqlite" => {
            let ledger = match config.sqlite_path.as_deref() {
                Some(path) => SqliteUsageLedger::open(Path::new(path))?,
                None => SqliteUsageLedger::new(data_dir)?,
            };
            Ok(Arc::new(ledger))
        }
        "memory" => Ok(Arc::new(InMemoryUsageLedger::new())),
        "" => anyhow::bail!("ledger.backend cannot be empty. Supported values: firestore, sqlite, memory"),
        other => anyhow::bail!(
            "Unknown ledger backend '{other}'. Supported values: firestore, sqlite, memory"
        ),
    }
}

/// Handle `summonbot ledger ...`.
pub async fn handle_command(command: LedgerCommands, config: &Config) -> Result<()> {
    let ledger = create_ledger(&config.ledger, &config.data_dir)?;
    let today = SystemClock.today(config.ledger.reference_timezone()?);
    match command {
        LedgerCommands::Show { server } => {
            let policy = quota_for(config, &server)?;
            println!("{}", show(ledger.as_ref(), &policy, today).await?);
        }
        LedgerCommands::Reset { server } => {
            let policy = quota_for(config, &server)?;
            reset(ledger.as_ref(), &policy, today).await?;
            println!(
                "Reset {server} usage for {today} ({} backend).",
                ledger.name()
            );
        }
    }
    Ok(())
}

fn quota_for(config: &Config, name: &str) -> Result<QuotaPolicy> {
    let Some(server) = config.server(name) else {
        bail!("Unknown server '{name}'. Run `summonbot servers` to list them.");
    };
    match &server.quota {
        Some(quota) => Ok(QuotaPolicy::from_config(&server.name, quota)),
        None => bail!("Server '{name}' has no daily cap, so it has no usage record."),
    }
}

async fn show(ledger: &dyn UsageLedger, policy: &QuotaPolicy, today: NaiveDate) -> Result<String> {
    let record = ledger
        .get(&policy.ledger_key)
        .await
        .with_context(|| format!("reading usage record '{}'", policy.ledger_key))?;
    let Some(record) = record else {
        return Ok(format!(
            "{}: no usage recorded ({} minutes left today)",
            policy.ledger_key, policy.daily_cap_minutes
        ));
    };
    let played = record.minutes_for(today);
    Ok(format!(
        "{}: {} minutes played on {} ({} of {} minutes left today)",
        policy.ledger_key,
        record.minutes_played,
        record.last_reset_date,
        policy.daily_cap_minutes.saturating_sub(played),
        policy.daily_cap_minutes
    ))
}

async fn reset(ledger: &dyn UsageLedger, policy: &QuotaPolicy, today: NaiveDate) -> Result<()> {
    ledger
        .set(&policy.ledger_key, &UsageRecord::fresh(today))
        .await
        .with_context(|| format!("resetting usage record '{}'", policy.ledger_key))
}
