//! Proxy server module.
//!
//! Every request is counted, optionally recorded, and run through the hook
//! chain. Unclaimed requests are then either served from the stub store
//! (fetching from the origin on a miss) or streamed through to the origin.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer, BoundProxy and the accept loop
//! - `handler` - per-request pipeline
//! - `forwarding` - outbound requests to the origin
//! - `dispatch` - stub body + head to client response
//! - `client` - pooled HTTP client creation
//! - `tls` - origin TLS policy
//! - `network` - listener socket setup

mod client;
mod context;
mod dispatch;
mod forwarding;
mod handler;
mod headers;
mod network;
mod response_ext;
mod server;
mod tls;

use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Bytes;

/// Body type for both directions; streamed bodies are not `Sync`.
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub use context::{ProxyState, RequestInfo};
pub use dispatch::{dispatch, dispatch_serialized, error_response};
pub use forwarding::{ForwardError, ForwardState};
pub use headers::X_STUB_PROXY_HOOK;
pub use server::{BoundProxy, ProxyServer};
