//! `.env` loading and environment list helpers.

use crate::utils::error::Result;
use std::path::Path;

/// Loads `KEY=VALUE` lines into the process environment. Lines starting
/// with `#` are comments. Variables that are already set are left alone.
/// A missing file is not an error. Returns the keys that were set.
pub fn load_env_file(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    let mut loaded = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || std::env::var_os(key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
        loaded.push(key.to_string());
    }

    tracing::debug!("Loaded {} variable(s) from {}", loaded.len(), path.display());
    Ok(loaded)
}

/// Splits on commas, dropping blank entries.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma-separated list from the environment, or `None` when unset.
pub fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|raw| parse_list(&raw))
}

pub fn env_list_or(key: &str, default: &[&str]) -> Vec<String> {
    env_list(key).unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}
