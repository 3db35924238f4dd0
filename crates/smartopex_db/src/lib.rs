//! Unified database layer for Smart Opex.
//!
//! This crate is the single source of truth for persisted state: expense
//! activities, their receipts and supporting documents, OCR extraction
//! results, the durable OCR job queue, and the review-status reconciliation
//! engine. All interfaces (CLI, worker) go through [`OpexDb`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use smartopex_db::{OpexDb, Result};
//!
//! let db = OpexDb::open("~/.smartopex/smartopex.sqlite3").await?;
//!
//! let activity = db.create_activity(new).await?;
//! let report = db.recompute_status(activity.id).await?;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
mod activities;
mod queue;
mod receipts;
mod status;

pub use error::{DbError, Result};
pub use queue::QueueStats;
pub use status::StatusReport;
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Unified database handle for all Smart Opex operations.
///
/// This is the ONLY way to access the database. Do not use raw sqlx elsewhere.
#[derive(Clone)]
pub struct OpexDb {
    pool: SqlitePool,
}

impl OpexDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let url = format!("sqlite:{}?mode=rw", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Current time as an RFC 3339 string (stored in TEXT columns).
    pub(crate) fn now_rfc3339() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    /// Current time as milliseconds since Unix epoch (backoff gates).
    pub(crate) fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("test.db");

        let db = OpexDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = OpexDb::open_existing(&db_path).await;
        assert!(result.is_err());
    }
}
