//! Captured origin responses ("stubs") and their persistence.
//!
//! # Module Structure
//!
//! - `head` - status + header mapping and its text form
//! - `store` - in-memory map backed by one body/head file pair per stub

mod head;
mod store;

pub use head::{HeadParseError, StubHead, CODE_FIELD};
pub use store::{FetchGuard, StubStore};

use bytes::Bytes;
use std::path::PathBuf;

/// A captured response: raw body bytes plus head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stub {
    pub body: Bytes,
    pub head: StubHead,
}

#[derive(Debug, thiserror::Error)]
pub enum StubError {
    #[error("stub I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
