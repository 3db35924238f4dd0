//! `smartopex worker` - run the OCR worker in the foreground.

use crate::cli::config;
use anyhow::Result;
use smartopex_worker::{Worker, WorkerArgs};
use std::path::PathBuf;
use tracing::info;

pub async fn run(db_flag: Option<PathBuf>, args: WorkerArgs) -> Result<()> {
    // A worker-level --db wins over the global flag
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config::db_path(db_flag));
    let db = smartopex_db::OpexDb::open(&db_path).await?;
    let runner = args.build_runner()?;

    info!(db = %db_path.display(), slots = args.slots, provider = ?args.provider, "Worker starting");

    let handle = Worker::start(db, runner, args.worker_config());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.shutdown().await?;

    Ok(())
}
