//! Upload configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/vhdup/config.toml`
//! - Windows: `%APPDATA%/vhdup/config.toml`
//!
//! Every field is optional; command line flags take precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use vhdup_balancer::DEFAULT_MAX_ATTEMPTS;
use vhdup_transfer::{DEFAULT_PAGE_SIZE, DEFAULT_READ_AHEAD, ProgressConfig};

/// Upload configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Concurrent range writes (0 = 8 per CPU).
    #[serde(default)]
    pub parallelism: usize,

    /// Largest range written at once, in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Ranges read ahead of the writers.
    #[serde(default = "default_read_ahead")]
    pub read_ahead: usize,

    /// Attempts per range before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Progress report interval in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Samples averaged for the throughput estimate.
    #[serde(default = "default_throughput_window")]
    pub throughput_window: usize,

    /// Container used when none is given on the command line.
    #[serde(default = "default_container")]
    pub container: String,

    /// Skip ranges whose bytes are all zero.
    #[serde(default = "default_true")]
    pub detect_empty: bool,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_read_ahead() -> usize {
    DEFAULT_READ_AHEAD
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_throughput_window() -> usize {
    60
}

fn default_container() -> String {
    "vhds".into()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallelism: 0,
            page_size: default_page_size(),
            read_ahead: default_read_ahead(),
            max_attempts: default_max_attempts(),
            progress_interval_ms: default_progress_interval_ms(),
            throughput_window: default_throughput_window(),
            container: default_container(),
            detect_empty: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the platform location when
    /// `path` is `None`.
    ///
    /// An explicit path must exist; a missing platform file yields defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let path = config_path();
                if path.exists() {
                    Self::read(&path)?
                } else {
                    Config::default()
                }
            }
        };
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Parallelism to use, resolving 0 to 8 per available CPU.
    pub fn effective_parallelism(&self, cli: Option<usize>) -> usize {
        match cli.unwrap_or(self.parallelism) {
            0 => {
                let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
                8 * cpus
            }
            n => n,
        }
    }

    pub fn progress(&self) -> ProgressConfig {
        ProgressConfig {
            interval: Duration::from_millis(self.progress_interval_ms),
            window: self.throughput_window,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("vhdup").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("vhdup")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.parallelism, 0);
        assert_eq!(config.page_size, 2 * 1024 * 1024);
        assert_eq!(config.read_ahead, 4);
        assert_eq!(config.max_attempts, 100);
        assert_eq!(config.progress_interval_ms, 1000);
        assert_eq!(config.throughput_window, 60);
        assert_eq!(config.container, "vhds");
        assert!(config.detect_empty);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str("parallelism = 16\ncontainer = \"images\"").unwrap();
        assert_eq!(config.parallelism, 16);
        assert_eq!(config.container, "images");
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(config.detect_empty);
    }

    #[test]
    fn roundtrip_toml() {
        let config = Config {
            max_attempts: 5,
            detect_empty: false,
            ..Config::default()
        };
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vhdup.toml");
        std::fs::write(&path, "read_ahead = 8\nprogress_interval_ms = 250").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.read_ahead, 8);
        assert_eq!(config.progress().interval, Duration::from_millis(250));
    }

    #[test]
    fn load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(dir.path().join("missing.toml").as_path())).is_err());
    }

    #[test]
    fn parallelism_resolution() {
        let config = Config::default();
        assert_eq!(config.effective_parallelism(Some(3)), 3);
        assert!(config.effective_parallelism(None) >= 8);
        assert_eq!(config.effective_parallelism(None) % 8, 0);

        let fixed = Config {
            parallelism: 12,
            ..Config::default()
        };
        assert_eq!(fixed.effective_parallelism(None), 12);
        assert_eq!(fixed.effective_parallelism(Some(2)), 2);
    }
}
