use std::{process, sync::Arc};

use anyhow::{Context, Result};
use colored::Colorize;
use log::{error, info};
use settings::Settings;
use tally_ledger::{Ledger, PgDatabase};

mod logging;
mod settings;

#[tokio::main]
async fn main() {
    logging::init_logger(settings::log_level());

    if let Err(e) = run().await {
        error!("{}", "tally failed!".bold().red());
        error!("{:#}", e);
        process::exit(1);
    }
}

/// Connects to the database, brings the schema up to date, and reports ledger drift
async fn run() -> Result<()> {
    let settings = Settings::from_env()?;

    info!("Connecting to database...");
    let database =
        PgDatabase::with_max_connections(&settings.database_url, settings.max_connections)
            .await
            .context("Could not connect to database")?;

    info!("Applying migrations...");
    database
        .migrate()
        .await
        .context("Could not apply migrations")?;

    let database = Arc::new(database);
    let ledger = Ledger::new(settings.ledger, database.clone(), database);

    info!("Auditing balances...");
    let drifted = ledger.audit.sweep().await.context("Audit failed")?;

    for report in &drifted {
        info!(
            "user {:>8}  balance {:>8}  ledger {:>8}  drift {:>+8}",
            report.user_id, report.balance, report.ledger_sum, report.drift
        );
    }

    if drifted.is_empty() {
        info!("{}", "All balances match their ledgers".green());
    }

    Ok(())
}
