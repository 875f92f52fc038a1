//! Per-request pipeline: count, record, hooks, then stub or transparent
//! dispatch.

use super::context::{ProxyState, RequestInfo};
use super::dispatch::{dispatch, error_stub};
use super::forwarding::{fetch, forward_streaming};
use super::headers::{mirror_connection, ProxyHeadersExt, X_STUB_PROXY_HOOK};
use super::response_ext::ResponseExt;
use super::ProxyBody;
use crate::config::ProxyMode;
use crate::fingerprint::fingerprint;
use crate::hooks::HookOutcome;
use crate::recording::RecordingSession;
use crate::stubs::{Stub, StubHead};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Handle one inbound request.
pub async fn handle_request(
    state: Arc<ProxyState>,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    let seq = state.next_seq();
    let info = RequestInfo::from_request(&req, remote_addr);
    debug!("Received request {}: {} {}", seq, info.method, info.uri);

    let mut session = match state.recorder() {
        Some(recorder) => match recorder.open(&info).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Recording disabled for request {}: {}", seq, e);
                None
            }
        },
        None => None,
    };

    match state.hooks.run(seq, &info).await {
        HookOutcome::Respond { hook_id, response } => {
            let mut reply = dispatch(response.body.clone(), &response.head);
            reply.set_header_value(&X_STUB_PROXY_HOOK, &hook_id);
            return Ok(complete(session, reply, &response.body).await);
        }
        HookOutcome::Continued { hook_id, delay } => {
            debug!(
                "Hook '{}' delayed request {} by {}ms",
                hook_id,
                seq,
                delay.as_millis()
            );
        }
        HookOutcome::Unclaimed => {}
    }

    match state.mode {
        ProxyMode::Stub => Ok(serve_stub(&state, req, &info, session).await),
        ProxyMode::Transparent => {
            match forward_streaming(&state.http_client, &state.origin, req, &info, &mut session)
                .await
            {
                Ok(response) => Ok(response),
                Err(e) => {
                    error!("Failed to forward request {} to origin: {}", seq, e);
                    let stub = error_stub(&e);
                    Ok(fail(session, stub).await)
                }
            }
        }
    }
}

async fn serve_stub(
    state: &ProxyState,
    req: Request<Incoming>,
    info: &RequestInfo,
    mut session: Option<RecordingSession>,
) -> Response<ProxyBody> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            let stub = error_stub(&e);
            return fail(session, stub).await;
        }
    };
    if let Some(session) = session.as_ref() {
        session.record_request_body(body.clone()).await;
    }

    let fp = fingerprint(info.method.as_str(), info.path_and_query(), &body);
    let stub = match state.stubs.lookup(&fp).await {
        Some(stub) => {
            debug!("Stub hit {} for {} {}", fp.short(), info.method, info.uri);
            stub
        }
        None => {
            let _guard = state.stubs.begin_fetch(&fp).await;
            match state.stubs.lookup(&fp).await {
                Some(stub) => {
                    debug!("Stub {} filled by a concurrent fetch", fp.short());
                    stub
                }
                None => {
                    debug!("Stub miss {} for {} {}", fp.short(), info.method, info.uri);
                    match fetch(&state.http_client, &state.origin, info, body, &mut session).await
                    {
                        Ok(stub) => {
                            let stub = Arc::new(stub);
                            if let Err(e) = state.stubs.store(&fp, Arc::clone(&stub)).await {
                                warn!("Serving unsaved stub {}: {}", fp.short(), e);
                            }
                            stub
                        }
                        Err(e) => {
                            error!("Failed to fetch {} from origin: {}", info.uri, e);
                            let stub = error_stub(&e);
                            return fail(session, stub).await;
                        }
                    }
                }
            }
        }
    };

    let mut reply = dispatch(stub.body.clone(), &stub.head);
    mirror_connection(reply.headers_mut(), &info.headers);
    complete(session, reply, &stub.body).await
}

/// Record the outgoing response unless the origin's was already logged,
/// then close the session.
async fn complete(
    session: Option<RecordingSession>,
    reply: Response<Full<Bytes>>,
    body: &Bytes,
) -> Response<ProxyBody> {
    if let Some(mut session) = session {
        if !session.has_response() {
            let head = StubHead::from_parts(reply.status(), reply.headers());
            session.record_head(&head).await;
            session.record_body(body.clone()).await;
        }
        session.finish();
    }
    reply.into_boxed()
}

async fn fail(mut session: Option<RecordingSession>, stub: Stub) -> Response<ProxyBody> {
    let reply = dispatch(stub.body.clone(), &stub.head);
    if let Some(session) = session.as_mut() {
        // Part of the origin's response is already logged.
        if session.has_response() {
            session.mark_interrupted().await;
            session
                .record_head(&StubHead::from_parts(reply.status(), reply.headers()))
                .await;
            session.record_body(stub.body.clone()).await;
        }
    }
    complete(session, reply, &stub.body).await
}
