//! Unified types for all Smart Opex database entities.
//!
//! These types are the single source of truth. All interfaces (CLI, worker)
//! should use these types.

use serde::{Deserialize, Serialize};

// ============================================================================
// Review Status
// ============================================================================

/// Canonical review status of an activity.
///
/// The stored column is NULL until the first reconciliation runs; a NULL
/// status (or any receipt without an extracted total) is reported as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    /// OCR sum matches the manual total within tolerance (automatic)
    Ok,
    /// Sums differ beyond tolerance; a human needs to look
    PerluReview,
    /// Manual override: the mismatch was accepted, or a manual-total edit
    /// confirmed reconciliation. Sticky against OCR-driven recomputation.
    TelahDireview,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::PerluReview => "PERLU_REVIEW",
            Self::TelahDireview => "TELAH_DIREVIEW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "PERLU_REVIEW" => Some(Self::PerluReview),
            "TELAH_DIREVIEW" => Some(Self::TelahDireview),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Activities
// ============================================================================

/// One expense record.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    pub id: i64,
    pub item_name: String,
    pub recipient_name: Option<String>,
    /// Manually entered total
    pub manual_total: f64,
    /// None = not yet reconciled (pending)
    pub status: Option<ReviewStatus>,
    pub district_id: Option<i64>,
    pub group_view_id: Option<i64>,
    pub transaction_date: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for creating an activity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewActivity {
    pub item_name: String,
    pub recipient_name: Option<String>,
    pub manual_total: f64,
    pub district_id: Option<i64>,
    pub group_view_id: Option<i64>,
    pub transaction_date: Option<String>,
    pub created_by: Option<i64>,
}

/// Field-sparse update for an activity. `None` fields are left untouched.
///
/// If `status` is supplied the value is stored verbatim and no
/// reconciliation runs for that call. Otherwise editing `manual_total`
/// triggers the manual-edit reconciliation path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityUpdate {
    pub item_name: Option<String>,
    pub recipient_name: Option<String>,
    pub manual_total: Option<f64>,
    pub district_id: Option<i64>,
    pub group_view_id: Option<i64>,
    pub transaction_date: Option<String>,
    pub status: Option<ReviewStatus>,
}

// ============================================================================
// Receipts / Documents / Extraction Results
// ============================================================================

/// One uploaded receipt image tied to exactly one activity.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub id: i64,
    pub opex_item_id: i64,
    pub file_path: String,
    /// NULL = extraction pending; 0 also covers "nothing parseable found"
    pub ocr_detected_total: Option<f64>,
    pub created_at: String,
}

/// A supporting document (receipt images also get a document row).
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub opex_item_id: i64,
    pub file_path: String,
    pub file_type: Option<String>,
    pub created_at: String,
}

/// Detailed OCR output for a document. One row per document, replaced
/// (delete-then-insert) on every reprocessing.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub id: i64,
    pub document_id: i64,
    pub extracted_text: Option<String>,
    pub parsed_amount: Option<f64>,
    pub confidence_score: Option<f64>,
    pub created_at: String,
}

/// Review summary for an activity: per-receipt extractions plus totals.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityReview {
    pub activity: Activity,
    pub receipts: Vec<Receipt>,
    /// Sum of extracted totals (NULL treated as 0)
    pub total_ocr: f64,
}

// ============================================================================
// Job Queue
// ============================================================================

/// Queue submission payload for one receipt OCR job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptJob {
    pub receipt_id: i64,
    pub opex_item_id: i64,
    pub document_id: i64,
    pub file_path: String,
}

impl ReceiptJob {
    /// Job identity: resubmitting the same receipt collapses onto the
    /// existing queue entry rather than duplicating work.
    pub fn job_key(&self) -> String {
        format!("receipt-{}", self.receipt_id)
    }
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A claimed or inspected queue entry.
#[derive(Debug, Clone, Serialize)]
pub struct OcrJob {
    pub id: i64,
    pub job_key: String,
    pub receipt_id: i64,
    pub opex_item_id: i64,
    pub document_id: i64,
    pub file_path: String,
    pub status: JobStatus,
    pub retry_count: i64,
    pub max_attempts: i64,
    pub next_run_at: i64,
    pub claim_time: Option<String>,
    pub end_time: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
}
