//! Smart Opex OCR worker binary.
//!
//! Usage:
//!     smartopex-worker --db ~/.smartopex/smartopex.sqlite3 --slots 2

use clap::Parser;
use smartopex_db::OpexDb;
use smartopex_logging::{init_logging, LogConfig};
use smartopex_worker::{Worker, WorkerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WorkerArgs::parse();

    let _log_guard = init_logging(LogConfig {
        app_name: "smartopex-worker",
        verbose: true,
    })?;

    let db_path = args.db_path();
    let db = OpexDb::open(&db_path).await?;
    let runner = args.build_runner()?;

    tracing::info!("Starting Smart Opex OCR worker");
    tracing::info!("  Database: {}", db_path.display());
    tracing::info!("  Slots: {}", args.slots);
    tracing::info!("  Provider: {:?}", args.provider);

    let handle = Worker::start(db, runner, args.worker_config());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    handle.shutdown().await?;

    Ok(())
}
