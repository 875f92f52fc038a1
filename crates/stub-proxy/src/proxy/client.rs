//! Shared HTTP client for origin requests.

use super::tls::origin_tls_config;
use super::ProxyBody;
use crate::config::{ConnectionPoolConfig, OriginConfig};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::info;

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, ProxyBody>;

/// Create the pooled HTTP/1.1 client for `origin`.
///
/// The origin's protocol decides the TLS configuration; the connector
/// itself accepts both schemes.
pub fn create_http_client(
    origin: &OriginConfig,
    pool: &ConnectionPoolConfig,
) -> Result<HttpClient, anyhow::Error> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false);

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(origin_tls_config(origin)?)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        "Origin client configured ({}): connect_timeout={}s, max_idle={}, idle_timeout={}s",
        origin.protocol.as_str(),
        pool.connect_timeout_secs,
        pool.max_idle_per_host,
        pool.idle_timeout_secs
    );

    Ok(http_client)
}
