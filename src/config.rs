//! Project configuration for nudge
//!
//! Configuration is stored in `.nudge/config.toml` and controls delivery
//! timing, daemon cadence, agent discovery, and the target process command.
//!
//! Every field has a serde default so a missing or partial config file
//! always yields a usable configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Delivery timing and retry budget
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Daemon loop cadence
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Bound-agent discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Target process command
    #[serde(default)]
    pub target: TargetConfig,
}

/// Delivery timing, gating, and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// How long a target must be quiet before it counts as idle (ms)
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,

    /// Minimum spacing between injection attempts for one agent (ms)
    #[serde(default = "default_idle_check_interval_ms")]
    pub idle_check_interval_ms: u64,

    /// Minimum spacing between successful injections for one agent (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Refractory period after a successful delivery (ms)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Attempts per retry round before backing off
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff rounds before a signal is force-acknowledged
    #[serde(default = "default_max_retry_rounds")]
    pub max_retry_rounds: u32,

    /// Backoff between retry rounds (ms)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// When false, signals are acknowledged immediately without injection
    #[serde(default = "default_auto_inject")]
    pub auto_inject: bool,

    /// How long acknowledged signal files are retained before sweep (seconds)
    #[serde(default = "default_signal_ttl_secs")]
    pub signal_ttl_secs: u64,
}

fn default_idle_threshold_ms() -> u64 {
    3000
}

fn default_idle_check_interval_ms() -> u64 {
    1000
}

fn default_debounce_ms() -> u64 {
    10_000
}

fn default_cooldown_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_retry_rounds() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    15_000
}

fn default_auto_inject() -> bool {
    true
}

fn default_signal_ttl_secs() -> u64 {
    300
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: default_idle_threshold_ms(),
            idle_check_interval_ms: default_idle_check_interval_ms(),
            debounce_ms: default_debounce_ms(),
            cooldown_ms: default_cooldown_ms(),
            max_attempts: default_max_attempts(),
            max_retry_rounds: default_max_retry_rounds(),
            retry_backoff_ms: default_retry_backoff_ms(),
            auto_inject: default_auto_inject(),
            signal_ttl_secs: default_signal_ttl_secs(),
        }
    }
}

/// Daemon loop cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Supervisor tick interval (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Signal sweep interval (seconds); runs independently of ticking
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Bound-agent discovery
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Agent serviced even when no session or env binding exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
}

/// Target process command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Command to spawn for a target process
    #[serde(default = "default_target_command")]
    pub command: String,

    /// Extra arguments appended after the stream-json flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Spawn a target for bound agents that have no live process
    #[serde(default)]
    pub autospawn: bool,
}

fn default_target_command() -> String {
    "claude".to_string()
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            command: default_target_command(),
            args: Vec::new(),
            autospawn: false,
        }
    }
}

impl Config {
    /// Path to the config file inside a nudge directory
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join("config.toml")
    }

    /// Load config from `.nudge/config.toml`, falling back to defaults
    /// when the file is missing.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::config_path(dir);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;

        Ok(config)
    }

    /// Save config to `.nudge/config.toml`
    pub fn save(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }

        let path = Self::config_path(dir);
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        Ok(())
    }
}
