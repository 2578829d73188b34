use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser;

pub const CONFIG_ENV: &str = "VST3_LOADER_CONFIG";
pub const PLUGIN_DIR_ENV: &str = "VST3_LOADER_PLUGIN_DIR";

/// Loader settings, read once per plugin instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub plugin_directory: PathBuf,
    pub load_delay_ms: u64,
    pub default_sample_rate: f64,
    pub default_block_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            plugin_directory: browser::default_plugin_directory(),
            load_delay_ms: 5,
            default_sample_rate: 44_100.0,
            default_block_size: 512,
        }
    }
}

impl LoaderConfig {
    /// Reads `$VST3_LOADER_CONFIG` or `<config dir>/vst3-loader/config.json`,
    /// then applies `$VST3_LOADER_PLUGIN_DIR`.
    pub fn load() -> Self {
        let mut config = match config_file_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        if let Some(dir) = std::env::var_os(PLUGIN_DIR_ENV) {
            if !dir.is_empty() {
                config.plugin_directory = PathBuf::from(dir);
            }
        }
        config
    }

    /// Missing files yield defaults; unreadable ones are logged and yield
    /// defaults too.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::error!("Failed to parse loader config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                log::error!("Failed to read loader config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join("vst3-loader").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoaderConfig::load_from(&dir.path().join("nope.json"));
        assert_eq!(config, LoaderConfig::default());
        assert_eq!(config.load_delay(), Duration::from_millis(5));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "plugin_directory": "/opt/vst3", "load_delay_ms": 20 }"#).unwrap();

        let config = LoaderConfig::load_from(&path);
        assert_eq!(config.plugin_directory, PathBuf::from("/opt/vst3"));
        assert_eq!(config.load_delay_ms, 20);
        assert_eq!(config.default_block_size, 512);
    }

    #[test]
    fn garbage_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(LoaderConfig::load_from(&path), LoaderConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = LoaderConfig {
            plugin_directory: PathBuf::from("/tmp/plugins"),
            load_delay_ms: 1,
            default_sample_rate: 48_000.0,
            default_block_size: 128,
        };
        config.save_to(&path).unwrap();
        assert_eq!(LoaderConfig::load_from(&path), config);
    }
}
