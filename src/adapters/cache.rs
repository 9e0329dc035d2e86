use crate::domain::logs::{LogSnapshot, LogTable};
use crate::utils::error::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// On-disk cache of parsed export bundles, keyed by file identity and the
/// selected columns.
#[derive(Debug, Clone)]
pub struct LogCache {
    dir: PathBuf,
}

impl LogCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache_key(source: &Path, modified_nanos: u128, columns: &[String]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.to_string_lossy().as_bytes());
        hasher.update(b"|");
        hasher.update(modified_nanos.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(columns.join(",").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Key for `source` in its current state on disk.
    pub fn key_for(source: &Path, columns: &[String]) -> Result<String> {
        let modified = fs::metadata(source)?.modified()?;
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(Self::cache_key(source, nanos, columns))
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("{}.op.csv", key)),
            self.dir.join(format!("{}.state.csv", key)),
        )
    }

    /// A hit needs both sheets. Entries that fail to parse are removed and
    /// treated as a miss.
    pub fn load(&self, key: &str) -> Option<LogSnapshot> {
        let (op_path, state_path) = self.paths(key);
        if !op_path.is_file() || !state_path.is_file() {
            return None;
        }

        let read = |path: &Path| -> Result<LogTable> { LogTable::from_csv(&fs::read(path)?) };
        match (read(&op_path), read(&state_path)) {
            (Ok(operations), Ok(states)) => {
                tracing::debug!("📦 Cache hit for {}", key);
                Some(LogSnapshot { operations, states })
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("⚠️ Discarding corrupt cache entry {}: {}", key, e);
                let _ = fs::remove_file(&op_path);
                let _ = fs::remove_file(&state_path);
                None
            }
        }
    }

    pub fn store(&self, key: &str, snapshot: &LogSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let (op_path, state_path) = self.paths(key);
        fs::write(op_path, snapshot.operations.to_csv()?)?;
        fs::write(state_path, snapshot.states.to_csv()?)?;
        tracing::debug!("💾 Cached snapshot as {}", key);
        Ok(())
    }
}
