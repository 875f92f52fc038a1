//! Origin protocol and proxy mode types.

use serde::{Deserialize, Serialize};

/// Transport used to reach the origin.
///
/// Plain HTTP is the default. HTTPS is handled by the rustls connector in
/// [`crate::proxy`], so adding a transport means adding a variant here and a
/// branch in the client builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OriginProtocol {
    #[default]
    Http,
    Https,
}

impl OriginProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginProtocol::Http => "http",
            OriginProtocol::Https => "https",
        }
    }
}

/// How the proxy treats requests that are not claimed by a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Record the first origin response per fingerprint, replay it afterwards
    #[default]
    Stub,
    /// Always forward, streaming bodies through without caching
    Transparent,
}
