use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for the source table, capture files and archives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_minutes: u32,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_fetch_interval() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fetch_timeout_secs: default_fetch_timeout(),
            fetch_interval_minutes: default_fetch_interval(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neurofeed")
            .join("config.toml")
    }

    /// The tab-delimited source table (`url  description  proxy`).
    pub fn sources_path(&self) -> PathBuf {
        self.data_dir.join("feeds.csv")
    }

    /// Per-source capture files and raw XML dumps for the day in progress.
    pub fn capture_dir(&self) -> PathBuf {
        self.data_dir.join("feeds")
    }

    /// Dated global archive files.
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("global_feeds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_derive_from_data_dir() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/nf"),
            ..Config::default()
        };
        assert_eq!(config.sources_path(), PathBuf::from("/tmp/nf/feeds.csv"));
        assert_eq!(config.capture_dir(), PathBuf::from("/tmp/nf/feeds"));
        assert_eq!(config.archive_dir(), PathBuf::from("/tmp/nf/global_feeds"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.fetch_timeout_secs, 60);
        assert_eq!(config.fetch_interval_minutes, 30);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.fetch_timeout_secs, 60);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }
}
