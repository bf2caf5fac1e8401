use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::collectors::CaptureSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
    #[serde(default = "default_cpu_sample_window_ms")]
    pub cpu_sample_window_ms: u64,
    #[serde(default = "default_top_process_limit")]
    pub top_process_limit: usize,
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default)]
    pub gpu: GpuConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuConfig {
    #[serde(default = "default_gpu_enabled")]
    pub enabled: bool,
    #[serde(default = "default_nvidia_smi_path")]
    pub nvidia_smi_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            auto_refresh: default_auto_refresh(),
            cpu_sample_window_ms: default_cpu_sample_window_ms(),
            top_process_limit: default_top_process_limit(),
            history_len: default_history_len(),
            export_dir: default_export_dir(),
            gpu: GpuConfig::default(),
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: default_gpu_enabled(),
            nvidia_smi_path: default_nvidia_smi_path(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if !(100..=5000).contains(&self.cpu_sample_window_ms) {
            return Err(ConfigError::Validation(
                "cpu_sample_window_ms must be between 100 and 5000".to_string(),
            ));
        }
        if self.top_process_limit < 1 {
            return Err(ConfigError::Validation(
                "top_process_limit must be >= 1".to_string(),
            ));
        }
        if self.history_len < 1 {
            return Err(ConfigError::Validation(
                "history_len must be >= 1".to_string(),
            ));
        }
        if self.gpu.enabled && self.gpu.nvidia_smi_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "gpu.nvidia_smi_path must not be empty when gpu.enabled is true".to_string(),
            ));
        }

        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            cpu_sample_window: Duration::from_millis(self.cpu_sample_window_ms),
            top_process_limit: self.top_process_limit,
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn default_listen() -> String {
    "127.0.0.1:9200".to_string()
}

const fn default_interval_secs() -> u64 {
    8
}

const fn default_auto_refresh() -> bool {
    true
}

const fn default_cpu_sample_window_ms() -> u64 {
    500
}

const fn default_top_process_limit() -> usize {
    8
}

const fn default_history_len() -> usize {
    30
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

const fn default_gpu_enabled() -> bool {
    true
}

fn default_nvidia_smi_path() -> String {
    "nvidia-smi".to_string()
}
