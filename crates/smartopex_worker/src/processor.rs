//! OCR job processor: runs one claimed job end to end.
//!
//! Job boundary rules:
//! - extraction failures (backend error, malformed output, timeout) are
//!   caught here, logged, and leave the receipt pending - the job still
//!   completes, so the queue's retry machinery is NOT engaged for them;
//! - infrastructure failures (process launch, database) propagate, so the
//!   queue retries with backoff;
//! - a receipt deleted mid-processing is a benign skip, without triggering
//!   reconciliation.

use anyhow::Result;
use smartopex_db::{OcrJob, OpexDb};
use smartopex_ocr::OcrRunner;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// What one job did, for logging and tests.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub receipt_id: i64,
    /// None = extraction failed, receipt left pending
    pub detected: Option<f64>,
    /// Receipt vanished before the result could be written
    pub skipped: bool,
}

pub struct OcrProcessor {
    db: OpexDb,
    runner: Arc<OcrRunner>,
}

impl OcrProcessor {
    pub fn new(db: OpexDb, runner: Arc<OcrRunner>) -> Self {
        Self { db, runner }
    }

    /// Process one claimed job. An Err return means the queue should retry.
    pub async fn process(&self, job: &OcrJob) -> Result<JobOutcome> {
        let mut detected: Option<f64> = None;
        let mut raw_text: Option<String> = None;
        let mut confidence: Option<f64> = None;

        match self.runner.extract(Path::new(&job.file_path)).await {
            Ok(output) => {
                // Backend affirmatively found no amount => verified zero
                detected = Some(output.amount.unwrap_or(0.0));
                raw_text = output.raw_text;
                confidence = output.confidence;
            }
            Err(err) if err.is_infrastructure() => return Err(err.into()),
            Err(err) => {
                warn!(
                    receipt = job.receipt_id,
                    error = %err,
                    "OCR extraction failed; receipt stays pending"
                );
            }
        }

        let updated = self
            .db
            .set_receipt_extracted_total(job.receipt_id, detected)
            .await?;
        if !updated {
            warn!(
                receipt = job.receipt_id,
                "Receipt no longer exists; skipping OCR update"
            );
            return Ok(JobOutcome {
                receipt_id: job.receipt_id,
                detected,
                skipped: true,
            });
        }

        // Replace (never append) the document's extraction result
        self.db
            .replace_extraction_result(job.document_id, raw_text.as_deref(), detected, confidence)
            .await?;

        let report = self.db.recompute_status(job.opex_item_id).await?;
        info!(
            receipt = job.receipt_id,
            activity = job.opex_item_id,
            detected,
            pending = report.pending,
            status = report.status.map(|s| s.as_str()).unwrap_or("-"),
            "OCR job processed"
        );

        Ok(JobOutcome {
            receipt_id: job.receipt_id,
            detected,
            skipped: false,
        })
    }
}
