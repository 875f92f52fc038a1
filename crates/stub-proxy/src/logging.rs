//! Tracing subscriber setup.

use crate::config::{LogFormat, LoggingConfig};
use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set; a CLI override wins
/// over the configuration file.
pub fn init(config: &LoggingConfig, cli_level_override: Option<&str>) -> anyhow::Result<()> {
    let filter = resolve_filter(config, cli_level_override, std::env::var("RUST_LOG").ok())?;

    match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    }
    .map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

fn resolve_filter(
    config: &LoggingConfig,
    cli_level_override: Option<&str>,
    rust_log: Option<String>,
) -> anyhow::Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(&directives)
            .map_err(|err| anyhow!("invalid RUST_LOG `{directives}`: {err}"));
    }

    let raw_level = cli_level_override.unwrap_or(&config.level);
    let normalized = raw_level.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => EnvFilter::try_new(&normalized)
            .map_err(|err| anyhow!("invalid log level `{raw_level}`: {err}")),
        _ => Err(anyhow!(
            "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
        )),
    }
}
