//! Stub storage and session recording configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where captured stubs are persisted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StubConfig {
    #[serde(default = "default_stub_dir")]
    pub dir: PathBuf,
}

fn default_stub_dir() -> PathBuf {
    PathBuf::from("stubs")
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            dir: default_stub_dir(),
        }
    }
}

/// Per-request traffic log settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_enabled")]
    pub enabled: bool,
    #[serde(default = "default_recording_dir")]
    pub dir: PathBuf,
    /// File extension for session logs, without the dot
    #[serde(default = "default_recording_extension")]
    pub extension: String,
    /// Chunks buffered per session before producers wait on the writer
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_recording_enabled() -> bool {
    true
}

fn default_recording_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_recording_extension() -> String {
    "txt".to_string()
}

fn default_queue_depth() -> usize {
    64
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: default_recording_enabled(),
            dir: default_recording_dir(),
            extension: default_recording_extension(),
            queue_depth: default_queue_depth(),
        }
    }
}
