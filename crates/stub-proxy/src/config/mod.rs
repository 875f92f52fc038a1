//! Configuration types for the stub proxy.

mod hooks;
mod listen;
mod origin;
mod protocol;
mod recording;

use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use hooks::{DelayAction, HookActionConfig, HookConfig, HookMatch, PathMatch, RespondAction};
pub use listen::{ListenConfig, LogFormat, LoggingConfig};
pub use origin::{ConnectionPoolConfig, OriginConfig};
pub use protocol::{OriginProtocol, ProxyMode};
pub use recording::{RecordingConfig, StubConfig};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    pub origin: OriginConfig,
    #[serde(default)]
    pub mode: ProxyMode,
    #[serde(default)]
    pub stubs: StubConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Evaluated in order; the first matching hook claims the request
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

impl Config {
    /// Minimal configuration for a single origin, everything else defaulted.
    pub fn for_origin(host: impl Into<String>, port: u16) -> Self {
        Self {
            listen: ListenConfig::default(),
            origin: OriginConfig {
                host: host.into(),
                port,
                protocol: OriginProtocol::default(),
                tls_skip_verify: false,
            },
            mode: ProxyMode::default(),
            stubs: StubConfig::default(),
            recording: RecordingConfig::default(),
            connection_pool: ConnectionPoolConfig::default(),
            logging: LoggingConfig::default(),
            hooks: Vec::new(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(yaml).context("parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.origin.host.trim().is_empty() {
            anyhow::bail!("origin.host must not be empty");
        }
        if self.origin.port == 0 {
            anyhow::bail!("origin.port must be non-zero");
        }
        if self.recording.queue_depth == 0 {
            anyhow::bail!("recording.queue_depth must be at least 1");
        }
        if self.recording.extension.contains(|c| c == '/' || c == '\\') {
            anyhow::bail!(
                "recording.extension cannot contain path separators: '{}'",
                self.recording.extension
            );
        }

        let mut seen = std::collections::HashSet::new();
        for hook in &self.hooks {
            if !seen.insert(hook.id.as_str()) {
                anyhow::bail!("Duplicate hook id: '{}'", hook.id);
            }
            validate_hook(hook)?;
        }

        Ok(())
    }
}

fn validate_hook(hook: &HookConfig) -> Result<(), anyhow::Error> {
    let m = &hook.match_config;
    if m.every == Some(0) {
        anyhow::bail!("Hook '{}': 'every' must be at least 1", hook.id);
    }
    if let Some(p) = m.probability {
        if !(0.0..=1.0).contains(&p) {
            anyhow::bail!(
                "Hook '{}': probability must be between 0.0 and 1.0, got {p}",
                hook.id
            );
        }
    }
    for method in &m.methods {
        method
            .parse::<hyper::Method>()
            .map_err(|e| anyhow::anyhow!("Hook '{}': invalid method '{method}': {e}", hook.id))?;
    }
    if let PathMatch::Regex { regex } = &m.path {
        Regex::new(regex)
            .with_context(|| format!("Hook '{}': invalid path regex", hook.id))?;
    }
    match (&hook.action.respond, &hook.action.delay) {
        (Some(respond), None) => {
            if hyper::StatusCode::from_u16(respond.status).is_err() {
                anyhow::bail!("Hook '{}': invalid status {}", hook.id, respond.status);
            }
        }
        (None, Some(delay)) => {
            let (min, max) = delay.bounds();
            if min > max {
                anyhow::bail!(
                    "Hook '{}': delay min_ms ({min}) is greater than max_ms ({max})",
                    hook.id
                );
            }
        }
        (Some(_), Some(_)) => {
            anyhow::bail!("Hook '{}': action must set only one of 'respond' or 'delay'", hook.id)
        }
        (None, None) => {
            anyhow::bail!("Hook '{}': action must set 'respond' or 'delay'", hook.id)
        }
    }
    Ok(())
}
