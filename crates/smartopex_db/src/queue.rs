//! Durable OCR job queue.
//!
//! At-least-once delivery with atomic claiming via `UPDATE ... WHERE
//! status = 'QUEUED'` inside a transaction. Deduplication-by-key comes from
//! the UNIQUE `job_key` column (`receipt-{receiptId}`): re-submitting a job
//! for the same receipt collapses onto the existing entry.
//!
//! Completed jobs are removed from the queue; terminally failed jobs are
//! retained with their error message for operator inspection.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::OpexDb;
use serde::Serialize;
use sqlx::Row;
use tracing::info;

/// Retry ceiling per job (total attempts).
pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;

/// Base delay for exponential backoff between attempts.
pub const BACKOFF_BASE_MS: i64 = 5_000;

impl OpexDb {
    /// Enqueue an OCR job for a receipt.
    ///
    /// Returns true when a new entry was created, false when it collapsed
    /// onto an existing entry for the same receipt.
    pub async fn enqueue_receipt_ocr(&self, job: &ReceiptJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ocr_queue
                (job_key, receipt_id, opex_item_id, document_id, file_path,
                 status, max_attempts, next_run_at, created_at)
            VALUES (?, ?, ?, ?, ?, 'QUEUED', ?, 0, ?)
            ON CONFLICT(job_key) DO NOTHING
            "#,
        )
        .bind(job.job_key())
        .bind(job.receipt_id)
        .bind(job.opex_item_id)
        .bind(job.document_id)
        .bind(&job.file_path)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .bind(Self::now_rfc3339())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            info!(key = %job.job_key(), "OCR job enqueued");
        }
        Ok(inserted)
    }

    /// Atomically claim the next runnable job (backoff gates respected).
    pub async fn pop_ocr_job(&self) -> Result<Option<OcrJob>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id FROM ocr_queue
            WHERE status = 'QUEUED' AND next_run_at <= ?
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(Self::now_millis())
        .fetch_optional(&mut *tx)
        .await?;

        let job_id = match row {
            Some(row) => row.get::<i64, _>("id"),
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let rows_affected = sqlx::query(
            "UPDATE ocr_queue SET status = 'RUNNING', claim_time = ? WHERE id = ? AND status = 'QUEUED'",
        )
        .bind(Self::now_rfc3339())
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Claimed by another worker between SELECT and UPDATE
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;

        self.get_ocr_job(job_id).await
    }

    /// Get a queue entry by id.
    pub async fn get_ocr_job(&self, id: i64) -> Result<Option<OcrJob>> {
        let row = sqlx::query("SELECT * FROM ocr_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Complete a job: the entry is removed from the queue entirely.
    pub async fn complete_ocr_job(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM ocr_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record a job failure: requeue with exponential backoff while attempts
    /// remain, otherwise mark FAILED and retain for inspection.
    ///
    /// Returns the resulting status.
    pub async fn retry_or_fail_ocr_job(&self, id: i64, error: &str) -> Result<JobStatus> {
        let job = self
            .get_ocr_job(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("Queue entry {}", id)))?;

        let attempts_made = job.retry_count + 1;
        if attempts_made < job.max_attempts {
            // 5s, 10s, 20s, ...
            let delay_ms = BACKOFF_BASE_MS << job.retry_count.min(16);
            sqlx::query(
                r#"
                UPDATE ocr_queue SET
                    status = 'QUEUED',
                    retry_count = retry_count + 1,
                    next_run_at = ?,
                    claim_time = NULL,
                    error_message = ?
                WHERE id = ?
                "#,
            )
            .bind(Self::now_millis() + delay_ms)
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

            info!(job = id, attempt = attempts_made, delay_ms, "OCR job requeued");
            Ok(JobStatus::Queued)
        } else {
            sqlx::query(
                r#"
                UPDATE ocr_queue SET
                    status = 'FAILED',
                    end_time = ?,
                    error_message = ?
                WHERE id = ?
                "#,
            )
            .bind(Self::now_rfc3339())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

            info!(job = id, attempts = attempts_made, "OCR job failed terminally");
            Ok(JobStatus::Failed)
        }
    }

    /// List queue entries, newest first.
    pub async fn list_ocr_jobs(&self, limit: i64) -> Result<Vec<OcrJob>> {
        let rows = sqlx::query("SELECT * FROM ocr_queue ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Queue statistics.
    pub async fn ocr_queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                SUM(CASE WHEN status = 'QUEUED' THEN 1 ELSE 0 END) as queued,
                SUM(CASE WHEN status = 'RUNNING' THEN 1 ELSE 0 END) as running,
                SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END) as failed
            FROM ocr_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            total: row.get::<i64, _>("total") as u64,
            queued: row.get::<Option<i64>, _>("queued").unwrap_or(0) as u64,
            running: row.get::<Option<i64>, _>("running").unwrap_or(0) as u64,
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0) as u64,
        })
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<OcrJob> {
    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown job status: {}", status_str)))?;

    Ok(OcrJob {
        id: row.get("id"),
        job_key: row.get("job_key"),
        receipt_id: row.get("receipt_id"),
        opex_item_id: row.get("opex_item_id"),
        document_id: row.get("document_id"),
        file_path: row.get("file_path"),
        status,
        retry_count: row.get("retry_count"),
        max_attempts: row.get("max_attempts"),
        next_run_at: row.get("next_run_at"),
        claim_time: row.get("claim_time"),
        end_time: row.get("end_time"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
    })
}

/// Queue statistics. Completed jobs are removed on completion, so they never
/// show up here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(receipt_id: i64) -> ReceiptJob {
        ReceiptJob {
            receipt_id,
            opex_item_id: 1,
            document_id: receipt_id,
            file_path: format!("/tmp/receipt-{}.jpg", receipt_id),
        }
    }

    #[tokio::test]
    async fn test_pop_empty_queue() {
        let db = OpexDb::open_in_memory().await.unwrap();
        assert!(db.pop_ocr_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_by_key() {
        let db = OpexDb::open_in_memory().await.unwrap();

        assert!(db.enqueue_receipt_ocr(&job(7)).await.unwrap());
        assert!(!db.enqueue_receipt_ocr(&job(7)).await.unwrap());

        let stats = db.ocr_queue_stats().await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn test_pop_claims_in_fifo_order() {
        let db = OpexDb::open_in_memory().await.unwrap();
        db.enqueue_receipt_ocr(&job(1)).await.unwrap();
        db.enqueue_receipt_ocr(&job(2)).await.unwrap();

        let first = db.pop_ocr_job().await.unwrap().unwrap();
        assert_eq!(first.receipt_id, 1);
        assert_eq!(first.status, JobStatus::Running);

        let second = db.pop_ocr_job().await.unwrap().unwrap();
        assert_eq!(second.receipt_id, 2);

        // Both claimed, nothing left
        assert!(db.pop_ocr_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_removes_entry_and_frees_key() {
        let db = OpexDb::open_in_memory().await.unwrap();
        db.enqueue_receipt_ocr(&job(3)).await.unwrap();

        let claimed = db.pop_ocr_job().await.unwrap().unwrap();
        db.complete_ocr_job(claimed.id).await.unwrap();

        assert_eq!(db.ocr_queue_stats().await.unwrap().total, 0);
        // The key is free again for re-processing
        assert!(db.enqueue_receipt_ocr(&job(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_applies_backoff_gate() {
        let db = OpexDb::open_in_memory().await.unwrap();
        db.enqueue_receipt_ocr(&job(4)).await.unwrap();

        let claimed = db.pop_ocr_job().await.unwrap().unwrap();
        let status = db
            .retry_or_fail_ocr_job(claimed.id, "backend unreachable")
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Queued);

        let entry = db.get_ocr_job(claimed.id).await.unwrap().unwrap();
        assert_eq!(entry.retry_count, 1);
        assert!(entry.next_run_at > OpexDb::now_millis());

        // Gated by next_run_at, not immediately runnable
        assert!(db.pop_ocr_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_failure_is_retained() {
        let db = OpexDb::open_in_memory().await.unwrap();
        db.enqueue_receipt_ocr(&job(5)).await.unwrap();

        let claimed = db.pop_ocr_job().await.unwrap().unwrap();
        assert_eq!(
            db.retry_or_fail_ocr_job(claimed.id, "e1").await.unwrap(),
            JobStatus::Queued
        );
        assert_eq!(
            db.retry_or_fail_ocr_job(claimed.id, "e2").await.unwrap(),
            JobStatus::Queued
        );
        assert_eq!(
            db.retry_or_fail_ocr_job(claimed.id, "e3").await.unwrap(),
            JobStatus::Failed
        );

        let entry = db.get_ocr_job(claimed.id).await.unwrap().unwrap();
        assert_eq!(entry.status, JobStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some("e3"));

        let stats = db.ocr_queue_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
    }
}
