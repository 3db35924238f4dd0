//! Receipt, document, and extraction-result database operations.

use crate::error::Result;
use crate::types::*;
use crate::OpexDb;
use sqlx::Row;

impl OpexDb {
    // ========================================================================
    // Receipts
    // ========================================================================

    /// Attach a receipt image to an activity.
    ///
    /// Creates both a document row and a receipt row (the original system
    /// keeps the two in lockstep, matched by file path). The extracted total
    /// starts NULL, so the activity is pending until OCR completes.
    pub async fn add_receipt(
        &self,
        opex_item_id: i64,
        file_path: &str,
        file_type: Option<&str>,
    ) -> Result<(Receipt, Document)> {
        let document = self
            .add_document(opex_item_id, file_path, file_type)
            .await?;

        let now = Self::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO opex_receipts (opex_item_id, file_path, ocr_detected_total, created_at)
            VALUES (?, ?, NULL, ?)
            "#,
        )
        .bind(opex_item_id)
        .bind(file_path)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let receipt = Receipt {
            id: result.last_insert_rowid(),
            opex_item_id,
            file_path: file_path.to_string(),
            ocr_detected_total: None,
            created_at: now,
        };

        Ok((receipt, document))
    }

    /// Get a receipt by id.
    pub async fn get_receipt(&self, id: i64) -> Result<Option<Receipt>> {
        let row = sqlx::query("SELECT * FROM opex_receipts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row_to_receipt(&row)))
    }

    /// All receipts of an activity, oldest first.
    pub async fn receipts_for_activity(&self, opex_item_id: i64) -> Result<Vec<Receipt>> {
        let rows =
            sqlx::query("SELECT * FROM opex_receipts WHERE opex_item_id = ? ORDER BY id ASC")
                .bind(opex_item_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().map(row_to_receipt).collect())
    }

    /// Aggregate sum of extracted totals for an activity (NULL counts as 0).
    pub async fn receipt_sum_for_activity(&self, opex_item_id: i64) -> Result<f64> {
        let sum: Option<f64> = sqlx::query_scalar(
            "SELECT SUM(COALESCE(ocr_detected_total, 0)) FROM opex_receipts WHERE opex_item_id = ?",
        )
        .bind(opex_item_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum.unwrap_or(0.0))
    }

    /// Write a receipt's extracted total (job processor only).
    ///
    /// Returns false when the receipt no longer exists - the caller treats
    /// that as a benign skip, not an error.
    pub async fn set_receipt_extracted_total(
        &self,
        receipt_id: i64,
        total: Option<f64>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE opex_receipts SET ocr_detected_total = ? WHERE id = ?")
            .bind(total)
            .bind(receipt_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a receipt, cascading to documents sharing its file path and
    /// their extraction results.
    ///
    /// Returns None when the receipt does not exist or belongs to another
    /// activity.
    pub async fn delete_receipt(
        &self,
        opex_item_id: i64,
        receipt_id: i64,
    ) -> Result<Option<Receipt>> {
        let Some(receipt) = self.get_receipt(receipt_id).await? else {
            return Ok(None);
        };
        if receipt.opex_item_id != opex_item_id {
            return Ok(None);
        }

        let doc_rows = sqlx::query("SELECT id FROM documents WHERE opex_item_id = ? AND file_path = ?")
            .bind(opex_item_id)
            .bind(&receipt.file_path)
            .fetch_all(&self.pool)
            .await?;

        for row in &doc_rows {
            let doc_id: i64 = row.get("id");
            sqlx::query("DELETE FROM ocr_results WHERE document_id = ?")
                .bind(doc_id)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(doc_id)
                .execute(&self.pool)
                .await?;
        }

        sqlx::query("DELETE FROM opex_receipts WHERE id = ?")
            .bind(receipt_id)
            .execute(&self.pool)
            .await?;

        Ok(Some(receipt))
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Attach a supporting document to an activity.
    pub async fn add_document(
        &self,
        opex_item_id: i64,
        file_path: &str,
        file_type: Option<&str>,
    ) -> Result<Document> {
        let now = Self::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO documents (opex_item_id, file_path, file_type, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(opex_item_id)
        .bind(file_path)
        .bind(file_type)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Document {
            id: result.last_insert_rowid(),
            opex_item_id,
            file_path: file_path.to_string(),
            file_type: file_type.map(String::from),
            created_at: now,
        })
    }

    /// Get a document by id.
    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Document {
            id: row.get("id"),
            opex_item_id: row.get("opex_item_id"),
            file_path: row.get("file_path"),
            file_type: row.get("file_type"),
            created_at: row.get("created_at"),
        }))
    }

    /// Remove a document and its extraction result.
    ///
    /// Returns false when the document does not exist or belongs to another
    /// activity.
    pub async fn delete_document(&self, opex_item_id: i64, document_id: i64) -> Result<bool> {
        let Some(document) = self.get_document(document_id).await? else {
            return Ok(false);
        };
        if document.opex_item_id != opex_item_id {
            return Ok(false);
        }

        sqlx::query("DELETE FROM ocr_results WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    // ========================================================================
    // Extraction Results
    // ========================================================================

    /// Replace the extraction result for a document (delete-then-insert, not
    /// append). No-op when the document vanished.
    pub async fn replace_extraction_result(
        &self,
        document_id: i64,
        extracted_text: Option<&str>,
        parsed_amount: Option<f64>,
        confidence_score: Option<f64>,
    ) -> Result<bool> {
        if self.get_document(document_id).await?.is_none() {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM ocr_results WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO ocr_results
                (document_id, extracted_text, parsed_amount, confidence_score, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(extracted_text)
        .bind(parsed_amount)
        .bind(confidence_score)
        .bind(Self::now_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Extraction result for a document, if any.
    pub async fn extraction_result_for_document(
        &self,
        document_id: i64,
    ) -> Result<Option<ExtractionResult>> {
        let row = sqlx::query("SELECT * FROM ocr_results WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ExtractionResult {
            id: row.get("id"),
            document_id: row.get("document_id"),
            extracted_text: row.get("extracted_text"),
            parsed_amount: row.get("parsed_amount"),
            confidence_score: row.get("confidence_score"),
            created_at: row.get("created_at"),
        }))
    }
}

fn row_to_receipt(row: &sqlx::sqlite::SqliteRow) -> Receipt {
    Receipt {
        id: row.get("id"),
        opex_item_id: row.get("opex_item_id"),
        file_path: row.get("file_path"),
        ocr_detected_total: row.get("ocr_detected_total"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn activity(db: &OpexDb, manual: f64) -> i64 {
        db.create_activity(NewActivity {
            item_name: "test".into(),
            manual_total: manual,
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_receipt_sum_treats_null_as_zero() {
        let db = OpexDb::open_in_memory().await.unwrap();
        let id = activity(&db, 100.0).await;

        let (r1, _) = db.add_receipt(id, "/tmp/a.jpg", None).await.unwrap();
        db.add_receipt(id, "/tmp/b.jpg", None).await.unwrap();
        db.set_receipt_extracted_total(r1.id, Some(60.0))
            .await
            .unwrap();

        let sum = db.receipt_sum_for_activity(id).await.unwrap();
        assert!((sum - 60.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_set_total_on_missing_receipt_reports_skip() {
        let db = OpexDb::open_in_memory().await.unwrap();
        let updated = db.set_receipt_extracted_total(999, Some(10.0)).await.unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_delete_receipt_cascades_documents_and_results() {
        let db = OpexDb::open_in_memory().await.unwrap();
        let id = activity(&db, 50.0).await;

        let (receipt, document) = db.add_receipt(id, "/tmp/c.jpg", None).await.unwrap();
        db.replace_extraction_result(document.id, Some("text"), Some(50.0), Some(0.9))
            .await
            .unwrap();

        let deleted = db.delete_receipt(id, receipt.id).await.unwrap();
        assert!(deleted.is_some());
        assert!(db.get_document(document.id).await.unwrap().is_none());
        assert!(db
            .extraction_result_for_document(document.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_receipt_of_other_activity_is_none() {
        let db = OpexDb::open_in_memory().await.unwrap();
        let a = activity(&db, 10.0).await;
        let b = activity(&db, 20.0).await;
        let (receipt, _) = db.add_receipt(a, "/tmp/d.jpg", None).await.unwrap();

        assert!(db.delete_receipt(b, receipt.id).await.unwrap().is_none());
        assert!(db.get_receipt(receipt.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_extraction_result_is_one_to_one() {
        let db = OpexDb::open_in_memory().await.unwrap();
        let id = activity(&db, 10.0).await;
        let (_, document) = db.add_receipt(id, "/tmp/e.jpg", None).await.unwrap();

        db.replace_extraction_result(document.id, Some("first"), Some(1.0), None)
            .await
            .unwrap();
        db.replace_extraction_result(document.id, Some("second"), Some(2.0), None)
            .await
            .unwrap();

        let result = db
            .extraction_result_for_document(document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.extracted_text.as_deref(), Some("second"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ocr_results WHERE document_id = ?")
            .bind(document.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
