use super::client::{create_http_client, HttpClient};
use crate::config::{Config, OriginConfig, ProxyMode};
use crate::hooks::HookChain;
use crate::recording::SessionRecorder;
use crate::stubs::StubStore;
use hyper::Request;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Extracted request metadata
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: hyper::Method,
    pub uri: hyper::Uri,
    pub version: hyper::Version,
    pub headers: hyper::HeaderMap,
    pub remote_addr: SocketAddr,
}

impl RequestInfo {
    pub fn from_request<B>(req: &Request<B>, remote_addr: SocketAddr) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            remote_addr,
        }
    }

    /// Path and query as sent by the client, `/` if absent.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }
}

/// State shared by every connection of one proxy instance.
pub struct ProxyState {
    pub(super) origin: OriginConfig,
    pub(super) mode: ProxyMode,
    pub(super) http_client: HttpClient,
    pub(super) stubs: StubStore,
    pub(super) recorder: Option<SessionRecorder>,
    pub(super) hooks: HookChain,
    requests: AtomicU64,
}

impl ProxyState {
    pub fn new(config: &Config, hooks: HookChain) -> Result<Self, anyhow::Error> {
        let http_client = create_http_client(&config.origin, &config.connection_pool)?;
        let recorder = config
            .recording
            .enabled
            .then(|| SessionRecorder::new(&config.recording));

        Ok(Self {
            origin: config.origin.clone(),
            mode: config.mode,
            http_client,
            stubs: StubStore::new(config.stubs.dir.clone()),
            recorder,
            hooks,
            requests: AtomicU64::new(0),
        })
    }

    /// Count a new request and return its 1-based sequence number.
    pub fn next_seq(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    pub fn stubs(&self) -> &StubStore {
        &self.stubs
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_and_query() {
        let req = Request::builder()
            .uri("/1/statuses/show.json?id=20")
            .body(())
            .unwrap();
        let info = RequestInfo::from_request(&req, "127.0.0.1:1".parse().unwrap());
        assert_eq!(info.path_and_query(), "/1/statuses/show.json?id=20");

        let req = Request::builder()
            .uri("http://example.com")
            .body(())
            .unwrap();
        let info = RequestInfo::from_request(&req, "127.0.0.1:1".parse().unwrap());
        assert_eq!(info.path_and_query(), "/");
    }

    #[tokio::test]
    async fn test_sequence_numbers_start_at_one() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::for_origin("127.0.0.1", 8080);
        config.stubs.dir = dir.path().join("stubs");
        config.recording.enabled = false;

        let state = ProxyState::new(&config, HookChain::default()).unwrap();
        assert!(state.recorder().is_none());
        assert_eq!(state.next_seq(), 1);
        assert_eq!(state.next_seq(), 2);
        assert_eq!(state.request_count(), 2);
    }
}
