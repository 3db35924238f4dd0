//! Database schema creation for all Smart Opex tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::OpexDb;
use tracing::info;

impl OpexDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL mode for better concurrent access (worker + CLI share the file)
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_opex_tables().await?;
        self.create_queue_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Create expense-activity tables (activities, receipts, documents, OCR results).
    async fn create_opex_tables(&self) -> Result<()> {
        // Activities: one expense record, owns receipts and documents.
        // status is NULL until the first reconciliation runs.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS opex_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_name TEXT NOT NULL,
                recipient_name TEXT,
                amount REAL NOT NULL DEFAULT 0,
                status TEXT,
                district_id INTEGER,
                group_view_id INTEGER,
                transaction_date TEXT,
                created_by INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Receipts: one uploaded receipt image per row.
        // ocr_detected_total is NULL until the OCR job writes it.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS opex_receipts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                opex_item_id INTEGER NOT NULL REFERENCES opex_items(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                ocr_detected_total REAL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Supporting documents (receipt images also get a document row)
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                opex_item_id INTEGER NOT NULL REFERENCES opex_items(id) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                file_type TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Extraction results: at most one row per document, replaced on reprocessing
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS ocr_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                extracted_text TEXT,
                parsed_amount REAL,
                confidence_score REAL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_receipts_item ON opex_receipts(opex_item_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_item ON documents(opex_item_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ocr_results_doc ON ocr_results(document_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Create the durable OCR job queue table.
    async fn create_queue_tables(&self) -> Result<()> {
        // job_key is `receipt-{receiptId}`; its UNIQUE constraint is the
        // deduplication-by-key guarantee for idempotent re-submission.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS ocr_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_key TEXT NOT NULL UNIQUE,
                receipt_id INTEGER NOT NULL,
                opex_item_id INTEGER NOT NULL,
                document_id INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                next_run_at INTEGER NOT NULL DEFAULT 0,
                claim_time TEXT,
                end_time TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ocr_queue_status ON ocr_queue(status, next_run_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
