//! Smart Opex unified launcher.
//!
//! Subcommands: activity CRUD and review (`opex`), engine registry
//! administration (`engine`), queue inspection (`jobs`), and the OCR worker
//! (`worker`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use smartopex_logging::{init_logging, LogConfig};
use smartopex_worker::WorkerArgs;
use std::path::PathBuf;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "smartopex", about = "Receipt OCR reconciliation pipeline")]
struct Cli {
    /// Database path (default ~/.smartopex/smartopex.sqlite3)
    #[arg(long, global = true, env = "SMARTOPEX_DB")]
    db: Option<PathBuf>,

    /// Verbose console logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expense activities: create, review, edit, receipts, export
    Opex {
        #[command(subcommand)]
        command: cli::opex::OpexCommand,
    },
    /// OCR engine registry: versions and the active script
    Engine {
        #[command(subcommand)]
        command: cli::engine::EngineCommand,
    },
    /// Inspect the OCR job queue
    Jobs(cli::jobs::JobsArgs),
    /// Run the OCR worker in the foreground
    Worker(WorkerArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let _log_guard = init_logging(LogConfig {
        app_name: "smartopex",
        verbose: args.verbose,
    })?;

    match args.command {
        Command::Opex { command } => cli::opex::run(args.db, command).await,
        Command::Engine { command } => cli::engine::run(command),
        Command::Jobs(jobs) => cli::jobs::run(args.db, jobs).await,
        Command::Worker(worker) => cli::worker::run(args.db, worker).await,
    }
}
