//! Shared configuration and data directories for esearch
//!
//! Configuration lives under the platform config directory
//! (`~/.config/esearch/` on Linux); search indexes live under the platform
//! local data directory (`~/.local/share/esearch/`).
//!
//! Call [`init`] at startup to bootstrap both directories.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "esearch";

/// Create the config and data directories if they are missing.
///
/// Returns the config directory.
pub fn init() -> Result<PathBuf> {
    ensure_data_dir()?;
    ensure_config_dir()
}

/// Get the config directory (~/.config/esearch/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Get the data directory holding per-user indexes (~/.local/share/esearch/)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR))
}

/// Get the path to a config file within the config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Load and parse a JSON config file from the config directory
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<T> {
    let path = config_path(filename).context("Could not determine config directory")?;
    load_json_file(&path)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Check if a config file exists in the config directory
pub fn config_exists(filename: &str) -> bool {
    config_path(filename).is_some_and(|p| p.exists())
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Ensure the data directory exists
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = data_dir().context("Could not determine data directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    Ok(dir)
}

/// Save a value as JSON to a config file in the config directory
pub fn save_json<T: serde::Serialize>(filename: &str, value: &T) -> Result<()> {
    let dir = ensure_config_dir()?;
    save_json_file(&dir.join(filename), value)
}

/// Save a value as JSON to an arbitrary path, replacing it atomically
pub fn save_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write config file: {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        page_size: u32,
        label: String,
    }

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("esearch"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("esearch.json").unwrap();
        assert!(path.ends_with("esearch/esearch.json"));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("esearch-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.json");

        let sample = Sample {
            page_size: 150,
            label: "5".to_string(),
        };
        save_json_file(&path, &sample).unwrap();
        let loaded: Sample = load_json_file(&path).unwrap();
        assert_eq!(loaded, sample);
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result: Result<Sample> = load_json_file(Path::new("/nonexistent/esearch.json"));
        assert!(result.is_err());
    }
}
