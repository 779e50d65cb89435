//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/codesweep/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/codesweep/` (~/.config/codesweep/)
//! - State/Logs: `$XDG_STATE_HOME/codesweep/` (~/.local/state/codesweep/)
//!
//! The coordinator reads configuration once at run admission; changes do not
//! retroactively affect an in-flight run.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Content host (GitHub) access
    #[serde(default)]
    pub github: GithubConfig,

    /// Inference host settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Notification channel settings
    #[serde(default)]
    pub notify: NotifyConfig,

    /// File filtering applied during fetch
    #[serde(default)]
    pub filter: FilterConfig,

    /// Pipeline concurrency and retry budgets
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub API access configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    /// Personal access token (optional for public repositories)
    pub token: Option<String>,

    /// API base URL, override for GitHub Enterprise
    #[serde(default = "default_github_api_base")]
    pub api_base: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_github_api_base(),
            timeout_secs: default_github_timeout(),
        }
    }
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_github_timeout() -> u64 {
    30
}

/// Inference host configuration (Ollama-compatible chat API)
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Base URL of the inference host
    #[serde(default = "default_inference_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_inference_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_inference_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,

    /// Max attempts per file before recording a failure placeholder
    #[serde(default = "default_inference_max_attempts")]
    pub max_attempts: u32,

    /// Max characters of file content included in a review prompt
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_base_url(),
            model: default_inference_model(),
            temperature: default_inference_temperature(),
            timeout_secs: default_inference_timeout(),
            max_attempts: default_inference_max_attempts(),
            max_code_length: default_max_code_length(),
        }
    }
}

fn default_inference_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_inference_model() -> String {
    "qwen2.5-coder:14b".to_string()
}

fn default_inference_temperature() -> f32 {
    0.3
}

fn default_inference_timeout() -> u64 {
    120
}

fn default_inference_max_attempts() -> u32 {
    3
}

fn default_max_code_length() -> usize {
    12_000
}

/// Notification channel configuration (WeChat Work webhook)
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    /// Webhook URL; delivery is skipped when unset
    pub webhook_url: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    #[serde(default = "default_notify_max_retries")]
    pub max_retries: u32,
}

fn default_notify_timeout() -> u64 {
    10
}

fn default_notify_max_retries() -> u32 {
    3
}

/// File filtering applied by the fetch stage
#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    /// Extension allow-list (lowercase, no dot). None keeps all files.
    pub allowed_extensions: Option<Vec<String>>,

    /// Max file size in KiB; larger files are skipped, not failed
    #[serde(default = "default_max_file_size_kib")]
    pub max_file_size_kib: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: None,
            max_file_size_kib: default_max_file_size_kib(),
        }
    }
}

impl FilterConfig {
    /// Size limit in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_kib * 1024
    }
}

fn default_max_file_size_kib() -> u64 {
    100
}

/// Pipeline concurrency and retry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Concurrent inference calls per run
    #[serde(default = "default_per_run_concurrency")]
    pub per_run_concurrency: usize,

    /// Global ceiling on in-flight analysis jobs across all runs
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Max fetch attempts before failing the run
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,

    /// Wall-clock budget per run in seconds; exceeding it fails the run
    #[serde(default = "default_run_budget_secs")]
    pub run_budget_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            per_run_concurrency: default_per_run_concurrency(),
            max_workers: default_max_workers(),
            fetch_max_attempts: default_fetch_max_attempts(),
            run_budget_secs: default_run_budget_secs(),
        }
    }
}

fn default_per_run_concurrency() -> usize {
    4
}

fn default_max_workers() -> usize {
    32
}

fn default_fetch_max_attempts() -> u32 {
    3
}

fn default_run_budget_secs() -> u64 {
    900
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Rotated log files kept before the oldest is pruned
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_files() -> usize {
    7
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.per_run_concurrency == 0 {
            return Err(Error::Config(
                "pipeline.per_run_concurrency must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_workers < self.pipeline.per_run_concurrency {
            return Err(Error::Config(
                "pipeline.max_workers must be >= pipeline.per_run_concurrency".to_string(),
            ));
        }
        if self.inference.max_attempts == 0 {
            return Err(Error::Config(
                "inference.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.filter.max_file_size_kib == 0 {
            return Err(Error::Config(
                "filter.max_file_size_kib must be at least 1".to_string(),
            ));
        }
        if self.logging.max_files == 0 {
            return Err(Error::Config(
                "logging.max_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/codesweep/config.toml` (~/.config/codesweep/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("codesweep").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/codesweep/` (~/.local/state/codesweep/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("codesweep")
    }
}
