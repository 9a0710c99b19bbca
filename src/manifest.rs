//! Configuration file parsing for vpcctl
//!
//! Parses the optional `vpcctl.toml` configuration file using serde.
//! Every field has a default, so running without a file is the common case.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "vpcctl.toml";

/// Load configuration from a file
///
/// A missing file is only an error when the path was given explicitly;
/// the default path silently falls back to built-in defaults.
pub fn load(path: &Path, explicit: bool) -> Result<VpcctlConfig> {
    if !explicit && !path.exists() {
        return Ok(VpcctlConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: VpcctlConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct VpcctlConfig {
    /// Global configuration settings
    #[serde(default)]
    pub config: GlobalConfig,
}

impl VpcctlConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.config.command_timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "command_timeout_secs must be greater than zero".into(),
            ));
        }

        let jitter = self.config.retry.jitter_factor;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(Error::ConfigValidation(format!(
                "retry.jitter_factor must be between 0.0 and 1.0, got {}",
                jitter
            )));
        }

        if self.config.retry.max_attempts == 0 {
            return Err(Error::ConfigValidation(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Create the state, log and policy directories if they are missing
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.config.state_dir,
            &self.config.logs_dir,
            &self.config.policies_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Directory holding one JSON record per VPC
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory for the log file
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Directory searched for relative policy file names
    #[serde(default = "default_policies_dir")]
    pub policies_dir: PathBuf,

    /// Directory for deployed app scripts and pid files
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Upper bound for any single external command
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Retry/backoff configuration for acquiring the state lock
    #[serde(default)]
    pub retry: RetryConfig,
}

impl GlobalConfig {
    /// Timeout applied to each external command
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Path of the log file inside `logs_dir`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir.join("vpcctl.log")
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            logs_dir: default_logs_dir(),
            policies_dir: default_policies_dir(),
            run_dir: default_run_dir(),
            command_timeout_secs: default_command_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_policies_dir() -> PathBuf {
    PathBuf::from("policies")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_command_timeout_secs() -> u64 {
    30
}

// Retry configuration defaults
fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    8
}

fn default_jitter_factor() -> f64 {
    0.25
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}
