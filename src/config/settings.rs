//! User configuration settings
//!
//! Layered configuration: defaults → config file → environment variables

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::diff::{BinaryMode, DiffOptions};
use crate::error::{ConfigError, Error, Result};
use crate::job::SchedulerConfig;

/// Environment variable prefix (`GITWEAVE_WORKER_POOL_SIZE=8`, ...)
pub const ENV_PREFIX: &str = "GITWEAVE_";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Number of jobs that may execute at once across all repositories
    pub worker_pool_size: usize,

    /// Timeout for fetch/pull/push in seconds
    pub network_timeout_secs: u64,

    /// Watch repository control directories for external changes
    pub watch_enabled: bool,

    /// Quiescence window before watcher events are flushed, in milliseconds
    pub watch_debounce_ms: u64,

    /// Unchanged lines shown around each change
    pub diff_context_lines: usize,

    /// Lines longer than this (bytes) are not word-diffed
    pub word_diff_max_line_len: usize,

    /// Number of distinct lane colors in the commit graph
    pub graph_palette_size: usize,

    /// Commits fetched per history page
    pub commit_page_size: usize,

    /// git executable used for mutations and porcelain reads
    pub git_program: PathBuf,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: std::thread::available_parallelism()
                .map(|n| n.get().clamp(2, 8))
                .unwrap_or(4),
            network_timeout_secs: 120,
            watch_enabled: true,
            watch_debounce_ms: 150,
            diff_context_lines: 3,
            word_diff_max_line_len: 1000,
            graph_palette_size: 8,
            commit_page_size: 500,
            git_program: PathBuf::from("git"),
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration using an explicit file in place of the default location
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(config_path))
            // Layer environment variables (GITWEAVE_WORKER_POOL_SIZE, etc.)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the core cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("worker_pool_size", self.worker_pool_size),
            ("graph_palette_size", self.graph_palette_size),
            ("commit_page_size", self.commit_page_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        if self.network_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "network_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Pool size and network timeout for the job scheduler
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pool_size: self.worker_pool_size,
            network_timeout: self.network_timeout(),
        }
    }

    /// Diff engine options derived from these settings
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            context_lines: self.diff_context_lines,
            word_diff: true,
            max_word_diff_line_len: self.word_diff_max_line_len,
            binary: BinaryMode::Detect,
        }
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "gitweave", "gitweave").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.diff_context_lines, 3);
        assert_eq!(config.graph_palette_size, 8);
        assert_eq!(config.commit_page_size, 500);
        assert!(config.worker_pool_size >= 2);
        assert!(config.watch_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("worker_pool_size"));
        assert!(toml.contains("git_program"));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "diff_context_lines = 5\ngraph_palette_size = 12\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.diff_context_lines, 5);
        assert_eq!(config.graph_palette_size, 12);
        assert_eq!(config.commit_page_size, 500);
        assert_eq!(config.diff_options().context_lines, 5);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            network_timeout_secs: 30,
            watch_enabled: false,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.network_timeout(), Duration::from_secs(30));
        assert!(!loaded.watch_enabled);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "worker_pool_size = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("worker_pool_size"));
    }
}
