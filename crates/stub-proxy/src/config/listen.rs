//! Listener and logging configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_port")]
    pub port: u16,
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_listen_host")]
    pub host: String,
}

fn default_listen_port() -> u16 {
    9003
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            host: default_listen_host(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
