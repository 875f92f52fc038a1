//! Request fingerprinting.
//!
//! A fingerprint identifies a request by method, URL and body. It is the key
//! of the stub cache and names the stub files on disk, so it must be stable
//! across process restarts. Headers are deliberately left out: two requests
//! that differ only in headers replay the same stub.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 digest over the request identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex rendering.
    pub const LEN: usize = 64;

    /// Accept an existing fingerprint string, e.g. a stub file stem.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a request.
///
/// Each field is tagged and length-prefixed before hashing so that shifting
/// bytes between the URL and the body cannot produce a collision. The body is
/// only hashed when non-empty.
pub fn fingerprint(method: &str, url: &str, body: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, b"method", method.as_bytes());
    hash_field(&mut hasher, b"url", url.as_bytes());
    if !body.is_empty() {
        hash_field(&mut hasher, b"body", body);
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

fn hash_field(hasher: &mut Sha256, tag: &[u8], value: &[u8]) {
    hasher.update((tag.len() as u64).to_be_bytes());
    hasher.update(tag);
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value);
}
