//! Escrow RS operator CLI
//!
//! Applies migrations, runs reconciliation against PostgreSQL, and plays the
//! reference milestone lifecycle against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use esc_core::config::{AppConfig, LogFormat, LoggingConfig};
use esc_db::{Database, PgStore};
use esc_payments::{SandboxRail, TimeoutRail};
use esc_services::EscrowLedger;

mod demo;

#[derive(Debug, Parser)]
#[command(name = "escrow", version, about = "Milestone escrow operations")]
struct Cli {
    /// Emit logs as JSON regardless of ESCROW_LOG_FORMAT
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Re-drive captures and payouts stranded between rail and commit
    Reconcile {
        /// Minimum age in seconds of a row before it is touched
        #[arg(long, env = "ESCROW_RECONCILE_GRACE_SECS")]
        grace_secs: Option<u64>,
    },

    /// Run a project through its whole lifecycle in memory and print each step
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), command = ?cli.command, "starting escrow");

    match cli.command {
        Command::Migrate => migrate(&config).await,
        Command::Reconcile { grace_secs } => {
            let grace = grace_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.payments.reconcile_grace());
            reconcile(&config, grace).await
        }
        Command::Demo => demo::run(&config).await,
    }
}

/// Logs go to stderr so stdout carries only command output
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            )
            .init(),
    }
}

async fn migrate(config: &AppConfig) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await?;
    info!("connected to database");

    PgStore::new(&db).migrate().await?;
    info!("migrations applied");

    db.close().await;
    Ok(())
}

async fn reconcile(config: &AppConfig, grace: Duration) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await?;
    let store = Arc::new(PgStore::new(&db));
    // TODO: select the rail from configuration once a live rail is integrated
    let rail = Arc::new(TimeoutRail::new(SandboxRail::new(), config.payments.rail_timeout()));
    let ledger = EscrowLedger::new(store, rail);

    let report = ledger.reconcile(grace).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    db.close().await;

    if !report.is_clean() {
        warn!(failed = report.failed.len(), "reconciliation left rows behind");
        anyhow::bail!("{} stranded rows could not be reconciled", report.failed.len());
    }
    Ok(())
}
