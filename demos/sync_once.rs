//! Demo: run one sync with tracing enabled.
//!
//! Reads credentials from the environment (or a `.env` file), syncs workout
//! emails into the configured SQLite database, and prints the report as JSON.
//!
//! # Usage
//!
//! ```bash
//! export EMAIL_USER="your@gmail.com"
//! export EMAIL_PASS="your-app-password"
//! # Optional
//! export DATABASE_URL="sqlite://workouts.db"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=workout_sync=debug
//!
//! cargo run --example sync_once
//! ```

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use workout_sync::{SyncConfig, WorkoutStore, WorkoutSync};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Use RUST_LOG to control log levels, e.g. RUST_LOG=workout_sync=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("workout_sync=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = SyncConfig::from_env()?;
    tracing::info!(
        imap_host = %config.imap.imap_host,
        mailbox = %config.imap.mailbox,
        database_url = %config.database_url,
        "Starting workout sync"
    );

    let sync = WorkoutSync::connect(config).await?;
    let report = sync.run().await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.success {
        let records = sync.store().all().await?;
        println!("\n{} workouts on record", records.len());
        if let Some(latest) = records.last() {
            println!("Latest: {}", serde_json::to_string(latest)?);
        }
    }

    Ok(())
}
