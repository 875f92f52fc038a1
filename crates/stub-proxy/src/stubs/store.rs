//! Disk-backed stub store with an in-memory front.

use super::head::StubHead;
use super::{Stub, StubError};
use crate::fingerprint::Fingerprint;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

const BODY_EXT: &str = "body";
const HEAD_EXT: &str = "head";

/// Stub store keyed by request fingerprint.
///
/// Entries are loaded lazily from `<dir>/<fingerprint>.body` and
/// `<dir>/<fingerprint>.head` and kept in memory for the life of the process.
/// There is no eviction.
pub struct StubStore {
    dir: PathBuf,
    entries: RwLock<HashMap<Fingerprint, Arc<Stub>>>,
    /// Per-fingerprint locks held while an origin fetch is in flight
    inflight: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

/// Exclusive right to populate one fingerprint.
///
/// Concurrent misses on the same fingerprint queue up here; whoever gets the
/// guard second should look the stub up again before going to the origin.
pub struct FetchGuard<'a> {
    store: &'a StubStore,
    fingerprint: Fingerprint,
    _lock: OwnedMutexGuard<()>,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.store.inflight.lock();
        // One reference in the map, one in our guard: nobody else is waiting.
        let idle = inflight
            .get(&self.fingerprint)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2);
        if idle {
            inflight.remove(&self.fingerprint);
        }
    }
}

impl StubStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn body_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.{BODY_EXT}"))
    }

    pub fn head_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.{HEAD_EXT}"))
    }

    /// Number of stubs held in memory
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Fingerprints that have a body file on disk, sorted.
    ///
    /// Files whose stem is not a well-formed fingerprint are skipped. A
    /// missing directory holds no stubs.
    pub async fn stored_fingerprints(&self) -> io::Result<Vec<Fingerprint>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut found = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BODY_EXT) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(Fingerprint::parse)
            {
                Some(fingerprint) => found.push(fingerprint),
                None => debug!("Ignoring {}: not a stub file", path.display()),
            }
        }
        found.sort();
        Ok(found)
    }

    /// Find a stub, first in memory, then on disk.
    ///
    /// A missing or unreadable body file is a miss. A missing or corrupt head
    /// file still yields the body, with a default head.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<Stub>> {
        if let Some(stub) = self.entries.read().get(fingerprint) {
            return Some(Arc::clone(stub));
        }

        let body_path = self.body_path(fingerprint);
        let body = match tokio::fs::read(&body_path).await {
            Ok(body) => Bytes::from(body),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stub on disk for {}", fingerprint.short());
                return None;
            }
            Err(e) => {
                warn!(
                    "Failed to read stub body {}: {}; treating as miss",
                    body_path.display(),
                    e
                );
                return None;
            }
        };

        let head_path = self.head_path(fingerprint);
        let head = match tokio::fs::read_to_string(&head_path).await {
            Ok(text) => StubHead::parse(&text).unwrap_or_else(|e| {
                warn!(
                    "Corrupt stub head {}: {}; using default head",
                    head_path.display(),
                    e
                );
                StubHead::default()
            }),
            Err(e) => {
                warn!(
                    "Failed to read stub head {}: {}; using default head",
                    head_path.display(),
                    e
                );
                StubHead::default()
            }
        };

        let stub = Arc::new(Stub { body, head });
        debug!(
            "Loaded stub {} from disk ({} bytes)",
            fingerprint.short(),
            stub.body.len()
        );
        // A concurrent loader may have won; keep whichever landed first.
        let mut entries = self.entries.write();
        let stub = entries
            .entry(fingerprint.clone())
            .or_insert(stub)
            .clone();
        Some(stub)
    }

    /// Persist a stub and publish it in memory.
    ///
    /// The in-memory entry is updated even when the disk write fails so that
    /// this process keeps replaying what it fetched; the error is returned for
    /// the caller to log.
    pub async fn store(&self, fingerprint: &Fingerprint, stub: Arc<Stub>) -> Result<(), StubError> {
        let result = self.write_files(fingerprint, &stub).await;
        self.entries.write().insert(fingerprint.clone(), stub);
        if result.is_ok() {
            info!("Saved stub {}", fingerprint.short());
        }
        result
    }

    async fn write_files(&self, fingerprint: &Fingerprint, stub: &Stub) -> Result<(), StubError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StubError::Io {
                path: self.dir.clone(),
                source,
            })?;
        write_atomic(&self.body_path(fingerprint), &stub.body).await?;
        write_atomic(&self.head_path(fingerprint), stub.head.to_text().as_bytes()).await?;
        Ok(())
    }

    /// Wait for exclusive access to populate `fingerprint`.
    pub async fn begin_fetch(&self, fingerprint: &Fingerprint) -> FetchGuard<'_> {
        let lock = {
            let mut inflight = self.inflight.lock();
            // Entries only the map still references were left by cancelled waiters.
            inflight.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(inflight.entry(fingerprint.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        FetchGuard {
            store: self,
            fingerprint: fingerprint.clone(),
            _lock: guard,
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Write via a sibling temp file so readers never observe a partial stub.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StubError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let io_err = |source| StubError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, contents).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}
