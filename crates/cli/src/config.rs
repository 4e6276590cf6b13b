//! Configuration management for the CLI

use anyhow::{Context, Result};
use ops_lib::{OperationBudgets, RollbackPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration, read from `~/.config/opsctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Namespace for targets given without one
    pub default_namespace: Option<String>,
    pub prometheus_url: Option<String>,
    pub alertmanager_url: Option<String>,
    /// Budget overrides, in seconds
    pub scale_timeout_secs: Option<u64>,
    pub restart_timeout_secs: Option<u64>,
    pub rollback_timeout_secs: Option<u64>,
    pub rollback_policy: Option<RollbackPolicy>,
}

impl Config {
    /// Load configuration from the default location; a missing file is not an error
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Default budgets with any configured overrides applied
    pub fn budgets(&self) -> OperationBudgets {
        let defaults = OperationBudgets::default();
        OperationBudgets {
            scale: self
                .scale_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.scale),
            restart: self
                .restart_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.restart),
            rollback: self
                .rollback_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.rollback),
            ..defaults
        }
    }

    /// Get the configuration file path
    fn config_path() -> Result<PathBuf> {
        let home = dirs_next::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".config").join("opsctl").join("config.json"))
    }
}
