//! Fault-injection hook configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HookConfig {
    pub id: String,
    #[serde(rename = "match", default)]
    pub match_config: HookMatch,
    pub action: HookActionConfig,
}

/// Conditions that must all hold for a hook to fire.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HookMatch {
    /// Fire when the request sequence number is a multiple of this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub path: PathMatch,
    /// Chance in `0.0..=1.0` that an otherwise matching request fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(untagged)]
pub enum PathMatch {
    #[default]
    Any,
    Exact {
        exact: String,
    },
    Prefix {
        prefix: String,
    },
    Regex {
        regex: String,
    },
    Contains {
        contains: String,
    },
    EndsWith {
        #[serde(rename = "endsWith")]
        ends_with: String,
    },
}

/// What a matching hook does. Exactly one of `respond` or `delay` is set.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HookActionConfig {
    /// Answer the request directly; the origin is never contacted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respond: Option<RespondAction>,
    /// Hold the request, then continue with normal dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelayAction>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RespondAction {
    #[serde(default = "default_respond_status")]
    pub status: u16,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Wait this long before the response is written
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_respond_status() -> u16 {
    500
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DelayAction {
    Fixed { ms: u64 },
    Range { min_ms: u64, max_ms: u64 },
}

impl DelayAction {
    pub fn bounds(&self) -> (u64, u64) {
        match *self {
            DelayAction::Fixed { ms } => (ms, ms),
            DelayAction::Range { min_ms, max_ms } => (min_ms, max_ms),
        }
    }
}
