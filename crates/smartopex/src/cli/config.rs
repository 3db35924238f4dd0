//! Path resolution shared by CLI subcommands.

use anyhow::Result;
use smartopex_db::OpexDb;
use smartopex_ocr::EngineRegistry;
use std::path::PathBuf;

/// Resolve the database path: `--db` flag / `SMARTOPEX_DB` env, falling back
/// to `~/.smartopex/smartopex.sqlite3`.
pub fn db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| smartopex_logging::smartopex_home().join("smartopex.sqlite3"))
}

/// Open the database, creating it on first use.
pub async fn open_db(flag: Option<PathBuf>) -> Result<OpexDb> {
    Ok(OpexDb::open(db_path(flag)).await?)
}

/// The default engine registry under the Smart Opex home directory.
pub fn engine_registry() -> EngineRegistry {
    let home = smartopex_logging::smartopex_home();
    let fallback = std::env::var("OCR_SCRIPT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home.join("scripts").join("paddle_ocr_dummy.py"));
    EngineRegistry::new(home.join("uploads").join("ocr-engine"), fallback)
}
