//! Worker loop: claims queued OCR jobs and drives the processor.
//!
//! Each slot runs one job at a time; slots share nothing in memory - all
//! coordination goes through the persisted queue and receipt records. Job
//! errors never crash the worker process.

use crate::processor::OcrProcessor;
use anyhow::Result;
use smartopex_db::OpexDb;
use smartopex_ocr::OcrRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Worker configuration (plain data).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent job slots
    pub slots: usize,
    /// Idle delay between empty queue polls
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            slots: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    slot_handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for all slots to drain.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for handle in self.slot_handles {
            handle.await?;
        }
        Ok(())
    }
}

pub struct Worker;

impl Worker {
    /// Start slot pollers. Returns immediately; use the handle to stop.
    pub fn start(db: OpexDb, runner: OcrRunner, config: WorkerConfig) -> WorkerHandle {
        let processor = Arc::new(OcrProcessor::new(db.clone(), Arc::new(runner)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let slots = config.slots.max(1);
        info!(slots, "OCR worker starting");

        let slot_handles = (0..slots)
            .map(|slot| {
                let db = db.clone();
                let processor = Arc::clone(&processor);
                let shutdown_rx = shutdown_rx.clone();
                let poll_interval = config.poll_interval;
                tokio::spawn(async move {
                    run_slot(slot, db, processor, shutdown_rx, poll_interval).await;
                })
            })
            .collect();

        WorkerHandle {
            shutdown_tx,
            slot_handles,
        }
    }
}

async fn run_slot(
    slot: usize,
    db: OpexDb,
    processor: Arc<OcrProcessor>,
    mut shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    loop {
        if *shutdown_rx.borrow() {
            info!(slot, "Worker slot stopping");
            return;
        }

        match db.pop_ocr_job().await {
            Ok(Some(job)) => {
                let job_id = job.id;
                match processor.process(&job).await {
                    Ok(_) => {
                        if let Err(e) = db.complete_ocr_job(job_id).await {
                            error!(slot, job = job_id, error = %e, "Failed to complete job");
                        }
                    }
                    Err(e) => {
                        error!(slot, job = job_id, error = %e, "Job failed");
                        if let Err(e) = db.retry_or_fail_ocr_job(job_id, &e.to_string()).await {
                            error!(slot, job = job_id, error = %e, "Failed to record job failure");
                        }
                    }
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(e) => {
                error!(slot, error = %e, "Queue poll failed");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
}
