//! Configuration management for btrfsd.
//!
//! Uses figment to merge configuration from multiple sources:
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables
//! 4. Command-line arguments

use btrfsd_protocol::VolumeEntry;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Volumes present in the table at startup
    #[serde(default)]
    pub volume: Vec<VolumeEntry>,
}

/// Daemon-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Pipe name or socket path
    #[serde(default = "default_endpoint")]
    pub endpoint: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pause after a failed accept, in milliseconds
    #[serde(default = "default_accept_backoff_ms")]
    pub accept_backoff_ms: u64,
}

fn default_endpoint() -> PathBuf {
    btrfsd_protocol::default_endpoint()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_accept_backoff_ms() -> u64 {
    150
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            volume: Vec::new(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            log_level: default_log_level(),
            accept_backoff_ms: default_accept_backoff_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_file: Option<&PathBuf>) -> Result<Self, figment::Error> {
        Self::figment(config_file).extract()
    }

    fn figment(config_file: Option<&PathBuf>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Add config file if provided
        if let Some(path) = config_file {
            figment = figment.merge(Toml::file(path));
        } else {
            // Try default config locations
            let default_paths = [
                PathBuf::from("/etc/btrfsd/config.toml"),
                dirs::config_dir()
                    .unwrap_or_default()
                    .join("btrfsd/config.toml"),
            ];

            for path in &default_paths {
                if path.exists() {
                    figment = figment.merge(Toml::file(path));
                    break;
                }
            }
        }

        // Environment variables (BTRFSD_ prefix), e.g. BTRFSD_DAEMON__LOG_LEVEL
        figment.merge(Env::prefixed("BTRFSD_").split("__"))
    }

    /// Override endpoint from CLI
    pub fn with_endpoint(mut self, endpoint: Option<PathBuf>) -> Self {
        if let Some(e) = endpoint {
            self.daemon.endpoint = e;
        }
        self
    }

    /// Override log level from CLI
    pub fn with_log_level(mut self, log_level: Option<String>) -> Self {
        if let Some(level) = log_level {
            self.daemon.log_level = level;
        }
        self
    }
}
