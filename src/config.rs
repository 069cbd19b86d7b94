use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::freshness::FreshnessConfig;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub activation: ActivationConfig,
    pub capture: CaptureConfig,
    pub freshness: FreshnessConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ActivationConfig {
    /// Commands shorter than this (in characters) are never rewritten.
    pub min_command_len: usize,
    /// Ceiling under which a cheap-utility command counts as trivial.
    pub trivial_max_len: usize,
    /// Also activate on recognized expensive commands without a pipe.
    pub enable_pattern_catalog: bool,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            min_command_len: 10,
            trivial_max_len: 10,
            enable_pattern_catalog: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    pub file_prefix: String,
    /// Lines shown when a command without a pipe gets a truncation stage.
    pub truncate_lines: usize,
    pub max_history: usize,
    /// Snapshot semantics for the capture history.
    pub atomic_history: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            file_prefix: "autotee".to_string(),
            truncate_lines: 100,
            max_history: 10,
            atomic_history: true,
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path();
        if let Some(config_dir) = config_path.parent() {
            fs::create_dir_all(config_dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    fn get_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".autotee")
            .join("config.toml")
    }
}
