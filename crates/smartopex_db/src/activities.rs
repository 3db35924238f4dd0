//! Activity (opex item) database operations.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::OpexDb;
use sqlx::Row;

impl OpexDb {
    /// Create a new activity. Status starts unset (pending) until the first
    /// reconciliation runs.
    pub async fn create_activity(&self, new: NewActivity) -> Result<Activity> {
        let now = Self::now_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO opex_items
                (item_name, recipient_name, amount, district_id, group_view_id,
                 transaction_date, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.item_name)
        .bind(&new.recipient_name)
        .bind(new.manual_total)
        .bind(new.district_id)
        .bind(new.group_view_id)
        .bind(&new.transaction_date)
        .bind(new.created_by)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_activity(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("Activity {} after insert", id)))
    }

    /// Get an activity by id.
    pub async fn get_activity(&self, id: i64) -> Result<Option<Activity>> {
        let row = sqlx::query("SELECT * FROM opex_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_activity(&row)?)),
            None => Ok(None),
        }
    }

    /// List activities, newest first, optionally scoped to a district.
    pub async fn list_activities(&self, district_id: Option<i64>) -> Result<Vec<Activity>> {
        let rows = match district_id {
            Some(d) => {
                sqlx::query(
                    "SELECT * FROM opex_items WHERE district_id = ? ORDER BY created_at DESC",
                )
                .bind(d)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM opex_items ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_activity).collect()
    }

    /// List activities created by a given user, newest first (CSV export).
    pub async fn list_activities_by_user(&self, user_id: i64) -> Result<Vec<Activity>> {
        let rows =
            sqlx::query("SELECT * FROM opex_items WHERE created_by = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_activity).collect()
    }

    /// All activity ids (bulk recompute).
    pub async fn list_activity_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM opex_items ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    /// Apply non-status field updates. Reconciliation is NOT triggered here;
    /// use [`OpexDb::apply_activity_update`] for the full contract.
    pub(crate) async fn update_activity_fields(
        &self,
        id: i64,
        update: &ActivityUpdate,
    ) -> Result<Activity> {
        let mut sets: Vec<&str> = Vec::new();

        if update.item_name.is_some() {
            sets.push("item_name = ?");
        }
        if update.recipient_name.is_some() {
            sets.push("recipient_name = ?");
        }
        if update.manual_total.is_some() {
            sets.push("amount = ?");
        }
        if update.district_id.is_some() {
            sets.push("district_id = ?");
        }
        if update.group_view_id.is_some() {
            sets.push("group_view_id = ?");
        }
        if update.transaction_date.is_some() {
            sets.push("transaction_date = ?");
        }
        if update.status.is_some() {
            sets.push("status = ?");
        }
        sets.push("updated_at = ?");

        let sql = format!("UPDATE opex_items SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);

        if let Some(ref v) = update.item_name {
            query = query.bind(v);
        }
        if let Some(ref v) = update.recipient_name {
            query = query.bind(v);
        }
        if let Some(v) = update.manual_total {
            query = query.bind(v);
        }
        if let Some(v) = update.district_id {
            query = query.bind(v);
        }
        if let Some(v) = update.group_view_id {
            query = query.bind(v);
        }
        if let Some(ref v) = update.transaction_date {
            query = query.bind(v);
        }
        if let Some(v) = update.status {
            query = query.bind(v.as_str());
        }
        query = query.bind(Self::now_rfc3339()).bind(id);

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("Activity {}", id)));
        }

        self.get_activity(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("Activity {}", id)))
    }

    /// Write the stored status column directly (reconciliation engine only).
    pub(crate) async fn write_activity_status(
        &self,
        id: i64,
        status: ReviewStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE opex_items SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Self::now_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete an activity. Receipts, documents and extraction results go
    /// with it (foreign-key cascade).
    pub async fn delete_activity(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM opex_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Review summary: activity plus its receipts and the OCR total.
    pub async fn get_activity_review(&self, id: i64) -> Result<Option<ActivityReview>> {
        let Some(activity) = self.get_activity(id).await? else {
            return Ok(None);
        };

        let receipts = self.receipts_for_activity(id).await?;
        let total_ocr = receipts
            .iter()
            .map(|r| r.ocr_detected_total.unwrap_or(0.0))
            .sum();

        Ok(Some(ActivityReview {
            activity,
            receipts,
            total_ocr,
        }))
    }
}

pub(crate) fn row_to_activity(row: &sqlx::sqlite::SqliteRow) -> Result<Activity> {
    let status = match row.get::<Option<String>, _>("status") {
        Some(s) => Some(
            ReviewStatus::parse(&s)
                .ok_or_else(|| DbError::invalid_state(format!("Unknown review status: {}", s)))?,
        ),
        None => None,
    };

    Ok(Activity {
        id: row.get("id"),
        item_name: row.get("item_name"),
        recipient_name: row.get("recipient_name"),
        manual_total: row.get("amount"),
        status,
        district_id: row.get("district_id"),
        group_view_id: row.get("group_view_id"),
        transaction_date: row.get("transaction_date"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
