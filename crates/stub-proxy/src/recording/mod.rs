//! Per-request traffic recording.
//!
//! Every inbound request gets its own log file named by a monotonically
//! increasing session id. The file holds the request line, request headers
//! and body, then a `RESPONSE` separator, the response status, the response
//! headers and the response body:
//!
//! ```text
//! GET /1/statuses/show.json HTTP/1.1
//! host: localhost:9003
//! accept: */*
//!
//!
//! RESPONSE
//! ================================================
//! Status: 200
//! content-type: application/json
//!
//! {"id":1}
//! ```
//!
//! # Module Structure
//!
//! - `session` - a single log and its background writer

mod session;

pub use session::{RecordingSession, SessionTap};

use crate::config::RecordingConfig;
use crate::proxy::RequestInfo;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Opens recording sessions and hands out their ids.
pub struct SessionRecorder {
    dir: PathBuf,
    extension: String,
    queue_depth: usize,
    next_id: AtomicU64,
}

impl SessionRecorder {
    pub fn new(config: &RecordingConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            extension: config.extension.clone(),
            queue_depth: config.queue_depth.max(1),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.{}", self.extension))
    }

    /// Start a session for `request`, writing its request line and headers.
    pub async fn open(&self, request: &RequestInfo) -> io::Result<RecordingSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tokio::fs::create_dir_all(&self.dir).await?;
        let session = RecordingSession::create(id, self.path_for(id), self.queue_depth).await?;

        let mut preamble = format!(
            "{} {} {:?}\n",
            request.method, request.uri, request.version
        );
        for (name, value) in request.headers.iter() {
            preamble.push_str(name.as_str());
            preamble.push_str(": ");
            preamble.push_str(&String::from_utf8_lossy(value.as_bytes()));
            preamble.push('\n');
        }
        preamble.push('\n');
        session.write_text(preamble).await;

        info!("Serving request {} for {}", id, request.uri);
        Ok(session)
    }
}
