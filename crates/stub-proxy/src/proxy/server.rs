//! ProxyServer and its accept loop.

use super::context::ProxyState;
use super::handler::handle_request;
use super::network::bind_listener;
use crate::config::{Config, ProxyMode};
use crate::hooks::HookChain;
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// The main proxy server struct.
pub struct ProxyServer {
    config: Config,
    hooks: HookChain,
}

impl ProxyServer {
    /// Create a server whose hooks come from `config.hooks`.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let hooks = HookChain::from_config(&config.hooks)?;
        Ok(Self::with_hooks(config, hooks))
    }

    /// Create a server with a caller-built hook chain; `config.hooks` is
    /// ignored.
    pub fn with_hooks(config: Config, hooks: HookChain) -> Self {
        Self { config, hooks }
    }

    /// Bind the listening socket and build the shared state.
    pub async fn bind(self) -> Result<BoundProxy, anyhow::Error> {
        let Self { config, hooks } = self;
        let listen = format!("{}:{}", config.listen.host, config.listen.port);
        let addr = tokio::net::lookup_host(&listen)
            .await
            .with_context(|| format!("Failed to resolve listen address {listen}"))?
            .next()
            .with_context(|| format!("No address found for {listen}"))?;
        let listener =
            bind_listener(addr).with_context(|| format!("Failed to bind to {addr}"))?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ProxyState::new(&config, hooks)?);

        info!("Listening on http://{}", local_addr);
        info!("Proxying to {}", config.origin.base_uri());
        match config.mode {
            ProxyMode::Stub => {
                info!("Stub mode, stubs in {}", config.stubs.dir.display());
                match state.stubs().stored_fingerprints().await {
                    Ok(found) => info!("Found {} stubs on disk", found.len()),
                    Err(e) => warn!(
                        "Failed to scan stub directory {}: {}",
                        config.stubs.dir.display(),
                        e
                    ),
                }
            }
            ProxyMode::Transparent => info!("Transparent mode"),
        }
        if let Some(recorder) = state.recorder() {
            info!("Recording sessions to {}", recorder.dir().display());
        }
        info!("Loaded {} hooks", state.hooks.len());

        Ok(BoundProxy {
            listener,
            local_addr,
            state,
        })
    }

    /// Bind and serve until the accept loop fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        self.bind().await?.serve().await
    }
}

/// A proxy with its socket bound, ready to serve.
pub struct BoundProxy {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ProxyState>,
}

impl BoundProxy {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> Arc<ProxyState> {
        Arc::clone(&self.state)
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self) -> Result<(), anyhow::Error> {
        loop {
            let (stream, remote_addr) = self.listener.accept().await?;
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(state, req, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
