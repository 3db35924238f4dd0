//! Smart Opex OCR worker: consumes queued receipt jobs, runs the OCR
//! runner, persists extraction results, and triggers status reconciliation.

pub mod processor;
pub mod worker;

pub use processor::{JobOutcome, OcrProcessor};
pub use worker::{Worker, WorkerConfig, WorkerHandle};

use anyhow::{bail, Result};
use smartopex_ocr::{Backend, EngineRegistry, OcrRunner};
use std::path::PathBuf;
use std::time::Duration;

/// Backend selection flag.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Local,
    Remote,
}

#[derive(clap::Parser, Debug)]
#[command(name = "smartopex-worker", about = "OCR worker for Smart Opex")]
pub struct WorkerArgs {
    /// Database path (default ~/.smartopex/smartopex.sqlite3)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Concurrent job slots
    #[arg(long, default_value_t = 2)]
    pub slots: usize,

    /// OCR backend
    #[arg(long, value_enum, env = "OCR_PROVIDER", default_value_t = Provider::Local)]
    pub provider: Provider,

    /// Interpreter for local engine scripts
    #[arg(long, env = "OCR_PYTHON", default_value = "python3")]
    pub interpreter: String,

    /// Managed engine-script directory (default ~/.smartopex/uploads/ocr-engine)
    #[arg(long)]
    pub engine_dir: Option<PathBuf>,

    /// Built-in fallback script when no engine pointer resolves
    #[arg(long, env = "OCR_SCRIPT_PATH")]
    pub fallback_script: Option<PathBuf>,

    /// Remote OCR endpoint (required with --provider remote)
    #[arg(long, env = "OCR_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer token for the remote endpoint
    #[arg(long, env = "OCR_ENDPOINT_TOKEN")]
    pub token: Option<String>,

    /// Hard wall-clock timeout per extraction, in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Idle poll interval, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_ms: u64,
}

impl WorkerArgs {
    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| smartopex_logging::smartopex_home().join("smartopex.sqlite3"))
    }

    pub fn engine_registry(&self) -> EngineRegistry {
        let home = smartopex_logging::smartopex_home();
        let dir = self
            .engine_dir
            .clone()
            .unwrap_or_else(|| home.join("uploads").join("ocr-engine"));
        let fallback = self
            .fallback_script
            .clone()
            .unwrap_or_else(|| home.join("scripts").join("paddle_ocr_dummy.py"));
        EngineRegistry::new(dir, fallback)
    }

    pub fn build_runner(&self) -> Result<OcrRunner> {
        let backend = match self.provider {
            Provider::Local => Backend::Local {
                interpreter: self.interpreter.clone(),
                registry: self.engine_registry(),
            },
            Provider::Remote => {
                let Some(endpoint) = self.endpoint.clone() else {
                    bail!("--endpoint (or OCR_ENDPOINT) is required with --provider remote");
                };
                Backend::Remote {
                    endpoint,
                    token: self.token.clone(),
                }
            }
        };

        Ok(OcrRunner::new(backend).with_timeout(Duration::from_secs(self.timeout_secs)))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            slots: self.slots,
            poll_interval: Duration::from_millis(self.poll_ms),
        }
    }
}
