//! Status reconciliation engine.
//!
//! An activity's stored status is a pure function of (manual total, receipt
//! extracted totals), with one exception: the manual override
//! `TELAH_DIREVIEW` is sticky against OCR-driven recomputation and is only
//! cleared by a manual-total edit or an explicit status assignment.
//!
//! Transition table:
//!
//! | trigger            | sums match (|Δ| < ε) | sums differ     |
//! |--------------------|----------------------|-----------------|
//! | OCR completion     | `OK`                 | `PERLU_REVIEW`  |
//! | manual-total edit  | `TELAH_DIREVIEW`     | `PERLU_REVIEW`  |
//! | explicit status    | stored verbatim      | stored verbatim |
//!
//! The OCR path never overwrites `TELAH_DIREVIEW`; the manual-edit path may.

use crate::error::Result;
use crate::types::*;
use crate::OpexDb;
use serde::Serialize;
use tracing::debug;

/// Currency-unit tolerance absorbing floating rounding in extracted sums.
pub const SUM_TOLERANCE: f64 = 0.01;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Sum of receipt extracted totals (NULL treated as 0)
    pub sum: f64,
    /// At least one receipt has no extracted total yet
    pub pending: bool,
    /// Status after this pass (None while pending or when the activity is gone)
    pub status: Option<ReviewStatus>,
    /// Whether this pass wrote the stored status
    pub changed: bool,
}

impl StatusReport {
    fn noop(sum: f64, pending: bool) -> Self {
        Self {
            sum,
            pending,
            status: None,
            changed: false,
        }
    }
}

fn sums_match(sum: f64, manual: f64) -> bool {
    (sum - manual).abs() < SUM_TOLERANCE
}

impl OpexDb {
    /// OCR-driven recomputation, invoked after extraction completes and
    /// after receipt removal.
    ///
    /// While any receipt is still pending the stored status is left
    /// untouched. A missing activity is a benign no-op, never an error.
    pub async fn recompute_status(&self, opex_item_id: i64) -> Result<StatusReport> {
        let receipts = self.receipts_for_activity(opex_item_id).await?;

        let sum: f64 = receipts
            .iter()
            .map(|r| r.ocr_detected_total.unwrap_or(0.0))
            .sum();
        let pending = receipts.iter().any(|r| r.ocr_detected_total.is_none());

        if pending {
            return Ok(StatusReport::noop(sum, true));
        }

        let Some(activity) = self.get_activity(opex_item_id).await? else {
            // Deleted concurrently with processing
            return Ok(StatusReport::noop(sum, false));
        };

        // The manual override is sticky against automatic recomputation
        if activity.status == Some(ReviewStatus::TelahDireview) {
            return Ok(StatusReport {
                sum,
                pending: false,
                status: activity.status,
                changed: false,
            });
        }

        let new_status = if sums_match(sum, activity.manual_total) {
            ReviewStatus::Ok
        } else {
            ReviewStatus::PerluReview
        };

        let changed = activity.status != Some(new_status);
        if changed {
            self.write_activity_status(opex_item_id, new_status).await?;
            debug!(
                activity = opex_item_id,
                sum,
                manual = activity.manual_total,
                status = %new_status,
                "Review status updated"
            );
        }

        Ok(StatusReport {
            sum,
            pending: false,
            status: Some(new_status),
            changed,
        })
    }

    /// Apply a field-sparse activity update, then reconcile.
    ///
    /// An explicit `status` in the update is stored verbatim and skips
    /// reconciliation entirely. Otherwise the manual-edit rule applies:
    /// a matching sum yields `TELAH_DIREVIEW` when the manual total was
    /// edited (the edit is an authoritative reconciliation) and `OK` when it
    /// was not; a mismatch yields `PERLU_REVIEW` unconditionally, clearing
    /// any prior override.
    ///
    /// Returns None when the activity does not exist.
    pub async fn apply_activity_update(
        &self,
        opex_item_id: i64,
        update: ActivityUpdate,
    ) -> Result<Option<Activity>> {
        if self.get_activity(opex_item_id).await?.is_none() {
            return Ok(None);
        }

        let explicit_status = update.status.is_some();
        let manual_edited = update.manual_total.is_some();
        let updated = self.update_activity_fields(opex_item_id, &update).await?;

        if explicit_status {
            return Ok(Some(updated));
        }

        let sum = self.receipt_sum_for_activity(opex_item_id).await?;
        let new_status = if sums_match(sum, updated.manual_total) {
            if manual_edited {
                ReviewStatus::TelahDireview
            } else {
                ReviewStatus::Ok
            }
        } else {
            ReviewStatus::PerluReview
        };

        if updated.status != Some(new_status) {
            self.write_activity_status(opex_item_id, new_status).await?;
            debug!(
                activity = opex_item_id,
                sum,
                manual = updated.manual_total,
                manual_edited,
                status = %new_status,
                "Review status updated after edit"
            );
            return Ok(self.get_activity(opex_item_id).await?);
        }

        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup(manual: f64, totals: &[Option<f64>]) -> (OpexDb, i64) {
        let db = OpexDb::open_in_memory().await.unwrap();
        let activity = db
            .create_activity(NewActivity {
                item_name: "test".into(),
                manual_total: manual,
                ..Default::default()
            })
            .await
            .unwrap();

        for (i, total) in totals.iter().enumerate() {
            let (receipt, _) = db
                .add_receipt(activity.id, &format!("/tmp/r{}.jpg", i), None)
                .await
                .unwrap();
            if total.is_some() {
                db.set_receipt_extracted_total(receipt.id, *total)
                    .await
                    .unwrap();
            }
        }

        (db, activity.id)
    }

    #[tokio::test]
    async fn pending_receipt_leaves_status_untouched() {
        let (db, id) = setup(100.0, &[Some(60.0), None]).await;

        let report = db.recompute_status(id).await.unwrap();
        assert!(report.pending);
        assert!(report.status.is_none());
        assert!(!report.changed);
        assert!(db.get_activity(id).await.unwrap().unwrap().status.is_none());
    }

    #[tokio::test]
    async fn matching_sum_within_tolerance_is_ok() {
        // 60.00 + 40.005 = 100.005, |Δ| = 0.005 < 0.01
        let (db, id) = setup(100.0, &[Some(60.0), Some(40.005)]).await;

        let report = db.recompute_status(id).await.unwrap();
        assert_eq!(report.status, Some(ReviewStatus::Ok));
        assert!(report.changed);
    }

    #[tokio::test]
    async fn mismatched_sum_needs_review() {
        let (db, id) = setup(100.0, &[Some(60.0), Some(30.0)]).await;

        let report = db.recompute_status(id).await.unwrap();
        assert!((report.sum - 90.0).abs() < f64::EPSILON);
        assert_eq!(report.status, Some(ReviewStatus::PerluReview));
    }

    #[tokio::test]
    async fn recompute_is_idempotent() {
        let (db, id) = setup(100.0, &[Some(50.0)]).await;

        let first = db.recompute_status(id).await.unwrap();
        assert!(first.changed);

        let second = db.recompute_status(id).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.status, first.status);
    }

    #[tokio::test]
    async fn reviewed_override_is_sticky_on_ocr_path() {
        let (db, id) = setup(100.0, &[Some(60.0), Some(30.0)]).await;

        db.apply_activity_update(
            id,
            ActivityUpdate {
                status: Some(ReviewStatus::TelahDireview),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let report = db.recompute_status(id).await.unwrap();
        assert_eq!(report.status, Some(ReviewStatus::TelahDireview));
        assert!(!report.changed);
    }

    #[tokio::test]
    async fn manual_edit_match_becomes_reviewed() {
        let (db, id) = setup(100.0, &[Some(60.0), Some(30.0)]).await;
        db.recompute_status(id).await.unwrap();

        let updated = db
            .apply_activity_update(
                id,
                ActivityUpdate {
                    manual_total: Some(90.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        // Human-driven match, not merely an automatic one
        assert_eq!(updated.status, Some(ReviewStatus::TelahDireview));
    }

    #[tokio::test]
    async fn manual_edit_mismatch_clears_override() {
        let (db, id) = setup(90.0, &[Some(60.0), Some(30.0)]).await;

        db.apply_activity_update(
            id,
            ActivityUpdate {
                status: Some(ReviewStatus::TelahDireview),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let updated = db
            .apply_activity_update(
                id,
                ActivityUpdate {
                    manual_total: Some(500.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, Some(ReviewStatus::PerluReview));
    }

    #[tokio::test]
    async fn non_total_edit_uses_ocr_rule() {
        let (db, id) = setup(90.0, &[Some(60.0), Some(30.0)]).await;

        let updated = db
            .apply_activity_update(
                id,
                ActivityUpdate {
                    item_name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        // Sums already match; an edit that doesn't touch the total yields OK
        assert_eq!(updated.status, Some(ReviewStatus::Ok));
    }

    #[tokio::test]
    async fn explicit_status_is_stored_verbatim() {
        let (db, id) = setup(100.0, &[Some(60.0), None]).await;

        let updated = db
            .apply_activity_update(
                id,
                ActivityUpdate {
                    status: Some(ReviewStatus::TelahDireview),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        // Stored even though a receipt is still pending: recompute skipped
        assert_eq!(updated.status, Some(ReviewStatus::TelahDireview));
    }

    #[tokio::test]
    async fn missing_activity_is_noop() {
        let db = OpexDb::open_in_memory().await.unwrap();

        let report = db.recompute_status(12345).await.unwrap();
        assert!(!report.pending);
        assert!(report.status.is_none());
        assert!(!report.changed);

        let updated = db
            .apply_activity_update(12345, ActivityUpdate::default())
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn zero_receipts_compares_sum_of_zero() {
        let (db, id) = setup(100.0, &[]).await;

        let report = db.recompute_status(id).await.unwrap();
        assert!(!report.pending);
        assert_eq!(report.status, Some(ReviewStatus::PerluReview));
    }
}
