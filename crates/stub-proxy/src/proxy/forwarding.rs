//! Request forwarding to the origin.
//!
//! Stub mode buffers the origin response into a [`Stub`] while recording it
//! chunk by chunk. Transparent mode hands the client a body fed by a relay
//! task; the relay stops reading from the origin as soon as the client side
//! of the channel is gone.

use super::client::HttpClient;
use super::context::RequestInfo;
use super::headers::{append_forwarded_for, mirror_connection, VALUE_CLOSE};
use super::ProxyBody;
use crate::config::OriginConfig;
use crate::recording::{RecordingSession, SessionTap};
use crate::stubs::{Stub, StubHead};
use bytes::BytesMut;
use futures::stream;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use hyper::{Request, Response};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Frames buffered between the origin and a slow client.
const RELAY_DEPTH: usize = 16;

/// Lifecycle of one forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardState {
    Idle,
    Connecting,
    StreamingRequest,
    AwaitingResponse,
    StreamingResponse,
    Complete,
    Errored,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid outbound request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("origin request failed ({state:?}): {source}")]
    Origin {
        state: ForwardState,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
    #[error("origin response body failed: {0}")]
    Body(#[source] hyper::Error),
}

impl ForwardError {
    /// State the forward was in when it failed.
    pub fn state(&self) -> ForwardState {
        match self {
            ForwardError::Request(_) => ForwardState::Idle,
            ForwardError::Origin { state, .. } => *state,
            ForwardError::Body(_) => ForwardState::StreamingResponse,
        }
    }
}

struct Progress {
    state: ForwardState,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: ForwardState::Idle,
        }
    }

    fn advance(&mut self, next: ForwardState) {
        trace!("forward {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: ForwardError) -> ForwardError {
        trace!("forward {:?} -> Errored: {}", self.state, err);
        self.state = ForwardState::Errored;
        err
    }
}

/// Where an outbound request's framing headers come from.
enum Framing {
    /// Body fully buffered; send an exact content-length
    Buffered(usize),
    /// Body streamed; keep the client's framing headers
    Inbound,
}

fn outbound_request<B>(
    origin: &OriginConfig,
    info: &RequestInfo,
    body: B,
    framing: Framing,
) -> Result<Request<B>, ForwardError> {
    let uri = format!("{}{}", origin.base_uri(), info.path_and_query());
    let mut headers = info.headers.clone();

    if let Framing::Buffered(len) = framing {
        headers.remove(TRANSFER_ENCODING);
        if len > 0 || headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }
    let host = HeaderValue::from_str(&origin.authority()).map_err(hyper::http::Error::from)?;
    headers.insert(HOST, host);
    append_forwarded_for(&mut headers, &info.remote_addr.ip().to_string());
    headers.insert(CONNECTION, VALUE_CLOSE.clone());

    let mut request = Request::builder()
        .method(info.method.clone())
        .uri(uri)
        .body(body)?;
    *request.headers_mut() = headers;
    Ok(request)
}

fn origin_error(err: hyper_util::client::legacy::Error) -> ForwardError {
    let state = if err.is_connect() {
        ForwardState::Connecting
    } else if std::error::Error::source(&err)
        .and_then(|source| source.downcast_ref::<hyper::Error>())
        .is_some_and(|e| e.is_body_write_aborted())
    {
        ForwardState::StreamingRequest
    } else {
        ForwardState::AwaitingResponse
    };
    ForwardError::Origin { state, source: err }
}

/// Forward a buffered request and collect the origin's full response.
///
/// The response head and each body chunk are written to `session` as they
/// arrive.
pub async fn fetch(
    client: &HttpClient,
    origin: &OriginConfig,
    info: &RequestInfo,
    body: Bytes,
    session: &mut Option<RecordingSession>,
) -> Result<Stub, ForwardError> {
    let mut progress = Progress::new();
    let framing = Framing::Buffered(body.len());
    let body = Full::new(body)
        .map_err(|never: Infallible| match never {})
        .boxed_unsync();
    let request = outbound_request(origin, info, body, framing)?;

    debug!("Forwarding {} {} to {}", info.method, info.uri, origin.base_uri());
    progress.advance(ForwardState::Connecting);
    let response = client
        .request(request)
        .await
        .map_err(|e| progress.fail(origin_error(e)))?;

    progress.advance(ForwardState::StreamingResponse);
    let (parts, mut body) = response.into_parts();
    let head = StubHead::from_parts(parts.status, &parts.headers);
    if let Some(session) = session.as_mut() {
        session.record_head(&head).await;
    }

    let mut collected = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| progress.fail(ForwardError::Body(e)))?;
        if let Ok(data) = frame.into_data() {
            if let Some(session) = session.as_ref() {
                session.record_body(data.clone()).await;
            }
            collected.extend_from_slice(&data);
        }
    }
    progress.advance(ForwardState::Complete);

    Ok(Stub {
        body: collected.freeze(),
        head,
    })
}

/// Forward a request without buffering either body.
///
/// On success the session moves into the relay task, which closes it when
/// the response is done. On error the session is left in place for the
/// caller to record the error response.
pub async fn forward_streaming(
    client: &HttpClient,
    origin: &OriginConfig,
    req: Request<Incoming>,
    info: &RequestInfo,
    session: &mut Option<RecordingSession>,
) -> Result<Response<ProxyBody>, ForwardError> {
    let mut progress = Progress::new();
    let body = match session.as_ref() {
        Some(session) => tap_request_body(req.into_body(), session.tap()),
        None => req.into_body().boxed_unsync(),
    };
    let request = outbound_request(origin, info, body, Framing::Inbound)?;

    debug!(
        "Forwarding (streaming) {} {} to {}",
        info.method,
        info.uri,
        origin.base_uri()
    );
    progress.advance(ForwardState::Connecting);
    let response = client
        .request(request)
        .await
        .map_err(|e| progress.fail(origin_error(e)))?;

    progress.advance(ForwardState::StreamingResponse);
    let (mut parts, body) = response.into_parts();
    mirror_connection(&mut parts.headers, &info.headers);
    if let Some(session) = session.as_mut() {
        session
            .record_head(&StubHead::from_parts(parts.status, &parts.headers))
            .await;
    }

    let relayed = spawn_relay(body, session.take(), progress);
    Ok(Response::from_parts(parts, relayed))
}

/// Pass request body frames through unchanged, copying data into the log.
fn tap_request_body(body: Incoming, tap: SessionTap) -> ProxyBody {
    let frames = stream::unfold((body, tap), |(mut body, tap)| async move {
        let frame = body.frame().await?;
        if let Ok(frame) = &frame {
            if let Some(data) = frame.data_ref() {
                tap.write(data.clone()).await;
            }
        }
        Some((frame, (body, tap)))
    });
    StreamBody::new(frames).boxed_unsync()
}

fn spawn_relay(
    mut body: Incoming,
    session: Option<RecordingSession>,
    mut progress: Progress,
) -> ProxyBody {
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, hyper::Error>>(RELAY_DEPTH);

    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!("Client went away; abandoning origin response");
                    break;
                }
                next = body.frame() => next,
            };
            match next {
                Some(Ok(frame)) => {
                    if let (Some(session), Some(data)) = (session.as_ref(), frame.data_ref()) {
                        session.record_body(data.clone()).await;
                    }
                    if tx.send(Ok(frame)).await.is_err() {
                        debug!("Client went away; abandoning origin response");
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!("Origin response body failed: {}", e);
                    progress.advance(ForwardState::Errored);
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                None => {
                    progress.advance(ForwardState::Complete);
                    break;
                }
            }
        }
        if let Some(session) = session {
            session.finish();
        }
    });

    let frames = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    StreamBody::new(frames).boxed_unsync()
}
