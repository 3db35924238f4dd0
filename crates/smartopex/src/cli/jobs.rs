//! `smartopex jobs` - OCR queue inspection.

use crate::cli::config;
use anyhow::Result;
use clap::Args;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use serde::Serialize;
use smartopex_db::{OcrJob, QueueStats};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct JobsArgs {
    /// Maximum number of entries to show
    #[arg(long, default_value_t = 50)]
    pub limit: i64,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct JobsOutput {
    stats: QueueStats,
    jobs: Vec<OcrJob>,
}

pub async fn run(db_flag: Option<PathBuf>, args: JobsArgs) -> Result<()> {
    let db = config::open_db(db_flag).await?;

    let stats = db.ocr_queue_stats().await?;
    let jobs = db.list_ocr_jobs(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&JobsOutput { stats, jobs })?);
        return Ok(());
    }

    println!(
        "Queue: {} total ({} queued, {} running, {} failed)",
        stats.total, stats.queued, stats.running, stats.failed
    );

    if jobs.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(["ID", "Key", "Activity", "Status", "Retries", "Error"]);
    for job in &jobs {
        table.add_row([
            job.id.to_string(),
            job.job_key.clone(),
            job.opex_item_id.to_string(),
            job.status.to_string(),
            job.retry_count.to_string(),
            job.error_message.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");

    Ok(())
}
