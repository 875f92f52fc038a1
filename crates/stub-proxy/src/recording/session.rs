//! A single request's traffic log and its background writer.

use crate::stubs::StubHead;
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(super) const RESPONSE_SEPARATOR: &str =
    "\nRESPONSE\n================================================\n";

pub(super) const INTERRUPTED_SEPARATOR: &str =
    "\nINTERRUPTED\n================================================\n";

/// Cheap handle that appends raw chunks to a session log.
///
/// Producers wait when the writer falls `queue_depth` chunks behind. Once the
/// writer has failed, writes are dropped silently.
#[derive(Clone)]
pub struct SessionTap {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

impl SessionTap {
    pub async fn write(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        if self.tx.send(chunk).await.is_err() {
            debug!("Session {} writer is gone; dropping chunk", self.id);
        }
    }
}

/// Per-request traffic log.
///
/// Everything recorded goes through a bounded queue to a task that owns the
/// file and performs one write per chunk. [`RecordingSession::close`] stops
/// accepting new data and waits until the queue is drained.
pub struct RecordingSession {
    id: u64,
    path: PathBuf,
    tap: SessionTap,
    responded: bool,
    writer: JoinHandle<io::Result<()>>,
}

impl RecordingSession {
    /// Create the log file and start its writer.
    pub(super) async fn create(id: u64, path: PathBuf, queue_depth: usize) -> io::Result<Self> {
        let file = File::create(&path).await?;
        let (tx, rx) = mpsc::channel(queue_depth);
        let writer = tokio::spawn(drain(file, rx));
        Ok(Self {
            id,
            path,
            tap: SessionTap { id, tx },
            responded: false,
            writer,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a response head has been recorded yet.
    pub fn has_response(&self) -> bool {
        self.responded
    }

    /// Handle for recording from another task, e.g. a request body pump.
    pub fn tap(&self) -> SessionTap {
        self.tap.clone()
    }

    pub(super) async fn write_text(&self, text: String) {
        self.tap.write(Bytes::from(text)).await;
    }

    /// Append a chunk of the request body.
    pub async fn record_request_body(&self, chunk: Bytes) {
        self.tap.write(chunk).await;
    }

    /// Record the response status line and the response's own headers.
    pub async fn record_head(&mut self, head: &StubHead) {
        let mut out = BytesMut::new();
        if !self.responded {
            out.put_slice(RESPONSE_SEPARATOR.as_bytes());
            self.responded = true;
        }
        out.put_slice(format!("Status: {}\n", head.status).as_bytes());
        for (name, value) in &head.headers {
            out.put_slice(format!("{name}: {value}\n").as_bytes());
        }
        out.put_slice(b"\n");
        self.tap.write(out.freeze()).await;
    }

    /// Append a chunk of the response body.
    pub async fn record_body(&self, chunk: Bytes) {
        self.tap.write(chunk).await;
    }

    /// Note that the response logged so far was cut short and a different
    /// one follows.
    pub async fn mark_interrupted(&self) {
        self.write_text(INTERRUPTED_SEPARATOR.to_string()).await;
    }

    /// Finish the session and wait for the log to be flushed.
    ///
    /// Outstanding [`SessionTap`]s keep the file open until they are dropped.
    pub async fn close(self) -> io::Result<()> {
        let Self {
            id, tap, writer, ..
        } = self;
        drop(tap);
        match writer.await {
            Ok(result) => {
                debug!("Session {} closed", id);
                result
            }
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }

    /// Close in the background, logging any writer failure.
    pub fn finish(self) {
        tokio::spawn(async move {
            let id = self.id;
            if let Err(e) = self.close().await {
                warn!("Failed to write session {}: {}", id, e);
            }
        });
    }
}

async fn drain(mut file: File, mut rx: mpsc::Receiver<Bytes>) -> io::Result<()> {
    while let Some(chunk) = rx.recv().await {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}
