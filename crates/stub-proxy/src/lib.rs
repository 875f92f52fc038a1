//! Recording, replaying and fault-injecting HTTP proxy.
//!
//! In stub mode the first response for each request fingerprint is fetched
//! from the origin and saved; later identical requests are answered from
//! disk. In transparent mode every request is streamed through. Both modes
//! record traffic per request and run an ordered chain of hooks that can
//! delay or fail requests before they are handled.

pub mod config;
pub mod fingerprint;
pub mod hooks;
pub mod logging;
pub mod proxy;
pub mod recording;
pub mod stubs;

pub use config::Config;
pub use proxy::{BoundProxy, ProxyServer};
