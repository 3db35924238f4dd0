//! Engine registry: versioned OCR scripts and the active-script pointer.
//!
//! Scripts live in a managed directory as `smartopex-engine-v{N}.py`. The
//! active script is named by a pointer record (`current.json`) that is
//! rewritten atomically; any failure to resolve the pointer falls back to
//! the built-in default script, never to an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const ENGINE_PREFIX: &str = "smartopex-engine-v";
const ENGINE_EXTENSION: &str = ".py";
const POINTER_FILE: &str = "current.json";

/// Uploaded engine scripts are capped at 2 MiB.
pub const MAX_ENGINE_SIZE: usize = 2 * 1024 * 1024;

/// Engine registry errors. Validation failures are rejected synchronously at
/// the boundary and never enter the pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid engine file: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The pointer record naming the active script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnginePointer {
    script_path: PathBuf,
    updated_at: String,
}

/// One engine script version as listed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct EngineVersion {
    pub file_name: String,
    pub script_path: PathBuf,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Managed directory of engine scripts plus the built-in fallback.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    dir: PathBuf,
    fallback: PathBuf,
}

impl EngineRegistry {
    pub fn new(dir: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fallback: fallback.into(),
        }
    }

    /// The managed script directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pointer_path(&self) -> PathBuf {
        self.dir.join(POINTER_FILE)
    }

    /// Resolve the active script path.
    ///
    /// Pointer-file problems (missing, corrupt, dangling target) are
    /// swallowed: resolution always succeeds, falling back to the built-in
    /// default.
    pub fn active_script(&self) -> PathBuf {
        match self.read_pointer() {
            Some(path) if path.exists() => path,
            Some(path) => {
                warn!(path = %path.display(), "Active engine script missing, using fallback");
                self.fallback.clone()
            }
            None => self.fallback.clone(),
        }
    }

    fn read_pointer(&self) -> Option<PathBuf> {
        let raw = fs::read_to_string(self.pointer_path()).ok()?;
        let pointer: EnginePointer = serde_json::from_str(&raw).ok()?;
        Some(pointer.script_path)
    }

    /// List script versions in the managed directory, newest first.
    pub fn list_versions(&self) -> Result<Vec<EngineVersion>, EngineError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let active = self.active_script();
        let mut versions = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.to_lowercase().ends_with(ENGINE_EXTENSION) {
                continue;
            }

            let script_path = entry.path();
            let modified = entry.metadata()?.modified()?;
            versions.push(EngineVersion {
                is_active: script_path == active,
                updated_at: DateTime::<Utc>::from(modified),
                file_name,
                script_path,
            });
        }

        versions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(versions)
    }

    /// Next available version file name: max existing suffix + 1, with a
    /// collision-avoidance loop against concurrent uploads.
    pub fn next_version_name(&self) -> String {
        let max_version = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .flatten()
                .filter_map(|e| version_suffix(&e.file_name().to_string_lossy()))
                .max()
                .unwrap_or(0),
            Err(_) => 0,
        };

        let mut next = max_version + 1;
        let mut name = engine_file_name(next);
        while self.dir.join(&name).exists() {
            next += 1;
            name = engine_file_name(next);
        }
        name
    }

    /// Persist new script content under the next version name, optionally
    /// activating it.
    pub fn upload(&self, content: &[u8], activate: bool) -> Result<EngineVersion, EngineError> {
        if content.is_empty() {
            return Err(EngineError::Validation("Engine file is required".into()));
        }
        if content.len() > MAX_ENGINE_SIZE {
            return Err(EngineError::Validation(format!(
                "Engine file exceeds {} bytes",
                MAX_ENGINE_SIZE
            )));
        }

        fs::create_dir_all(&self.dir)?;
        let file_name = self.next_version_name();
        let script_path = self.dir.join(&file_name);
        fs::write(&script_path, content)?;
        debug!(file = %file_name, "Engine script stored");

        if activate {
            self.set_active(&file_name)?;
        }

        Ok(EngineVersion {
            file_name,
            script_path,
            updated_at: Utc::now(),
            is_active: activate,
        })
    }

    /// Switch the active script. The name must be a bare `.py` file name
    /// inside the managed directory - path traversal is rejected.
    pub fn set_active(&self, file_name: &str) -> Result<PathBuf, EngineError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(EngineError::Validation("fileName is required".into()));
        }
        if file_name.contains('/') || file_name.contains('\\') {
            return Err(EngineError::Validation("Invalid fileName".into()));
        }
        if !file_name.to_lowercase().ends_with(ENGINE_EXTENSION) {
            return Err(EngineError::Validation("Only .py file is allowed".into()));
        }

        let script_path = self.dir.join(file_name);
        if !script_path.exists() {
            return Err(EngineError::Validation("Engine file not found".into()));
        }

        let pointer = EnginePointer {
            script_path: script_path.clone(),
            updated_at: Utc::now().to_rfc3339(),
        };
        self.write_pointer(&pointer)?;

        Ok(script_path)
    }

    /// Atomic pointer rewrite: temp file in the same directory, then rename.
    fn write_pointer(&self, pointer: &EnginePointer) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.tmp", POINTER_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(pointer)?)?;
        fs::rename(&tmp, self.pointer_path())?;
        Ok(())
    }
}

fn engine_file_name(version: u64) -> String {
    format!("{}{}{}", ENGINE_PREFIX, version, ENGINE_EXTENSION)
}

fn version_suffix(file_name: &str) -> Option<u64> {
    let lower = file_name.to_lowercase();
    let rest = lower.strip_prefix(ENGINE_PREFIX)?;
    let digits = rest.strip_suffix(ENGINE_EXTENSION)?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(tmp: &TempDir) -> EngineRegistry {
        EngineRegistry::new(
            tmp.path().join("ocr-engine"),
            tmp.path().join("fallback.py"),
        )
    }

    #[test]
    fn fallback_when_no_pointer() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        assert_eq!(reg.active_script(), tmp.path().join("fallback.py"));
    }

    #[test]
    fn corrupt_pointer_falls_back_silently() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        fs::create_dir_all(reg.dir()).unwrap();
        fs::write(reg.dir().join("current.json"), "{not json").unwrap();

        assert_eq!(reg.active_script(), tmp.path().join("fallback.py"));
    }

    #[test]
    fn dangling_pointer_falls_back() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        fs::create_dir_all(reg.dir()).unwrap();
        let gone = reg.dir().join("smartopex-engine-v9.py");
        fs::write(
            reg.dir().join("current.json"),
            format!(r#"{{"scriptPath": "{}", "updatedAt": "x"}}"#, gone.display()),
        )
        .unwrap();

        assert_eq!(reg.active_script(), tmp.path().join("fallback.py"));
    }

    #[test]
    fn uploads_get_strictly_increasing_suffixes() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);

        let v1 = reg.upload(b"print(1)", false).unwrap();
        let v2 = reg.upload(b"print(2)", false).unwrap();
        let v3 = reg.upload(b"print(3)", false).unwrap();

        assert_eq!(v1.file_name, "smartopex-engine-v1.py");
        assert_eq!(v2.file_name, "smartopex-engine-v2.py");
        assert_eq!(v3.file_name, "smartopex-engine-v3.py");
    }

    #[test]
    fn numbering_survives_gaps_from_deletion() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);

        reg.upload(b"a", false).unwrap();
        reg.upload(b"b", false).unwrap();
        fs::remove_file(reg.dir().join("smartopex-engine-v1.py")).unwrap();

        // Max suffix is still 2, so the next is 3, not a reused 1
        let v = reg.upload(b"c", false).unwrap();
        assert_eq!(v.file_name, "smartopex-engine-v3.py");
    }

    #[test]
    fn case_insensitive_names_count_toward_numbering() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        fs::create_dir_all(reg.dir()).unwrap();

        reg.upload(b"a", false).unwrap();
        fs::write(reg.dir().join("SMARTOPEX-ENGINE-V2.PY"), b"x").unwrap();

        let name = reg.next_version_name();
        assert_eq!(name, "smartopex-engine-v3.py");
    }

    #[test]
    fn set_active_rejects_traversal_and_wrong_extension() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        reg.upload(b"a", false).unwrap();

        assert!(matches!(
            reg.set_active("../evil.py"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            reg.set_active("engine.sh"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            reg.set_active(""),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            reg.set_active("smartopex-engine-v99.py"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn set_active_rewrites_pointer_and_resolves() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);

        let v1 = reg.upload(b"a", true).unwrap();
        assert_eq!(reg.active_script(), v1.script_path);

        let v2 = reg.upload(b"b", false).unwrap();
        reg.set_active(&v2.file_name).unwrap();
        assert_eq!(reg.active_script(), v2.script_path);

        let versions = reg.list_versions().unwrap();
        let active: Vec<_> = versions.iter().filter(|v| v.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].file_name, v2.file_name);
    }

    #[test]
    fn upload_enforces_size_cap() {
        let tmp = TempDir::new().unwrap();
        let reg = registry(&tmp);
        let oversized = vec![0u8; MAX_ENGINE_SIZE + 1];
        assert!(matches!(
            reg.upload(&oversized, false),
            Err(EngineError::Validation(_))
        ));
    }
}
