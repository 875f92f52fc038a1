//! Turning a body plus head into the response written to the client.

use crate::stubs::{Stub, StubHead};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING,
};
use hyper::{Response, StatusCode};
use std::fmt::Display;
use tracing::{debug, warn};

const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Build the client response for `body` and `head`.
///
/// The status comes from the head (200 when absent). `content-length` is
/// always the exact body length and `content-type` defaults to
/// `text/plain`. Framing headers from the head are dropped since the body is
/// sent in one piece. A `connection` header is kept for the caller to
/// rewrite.
pub fn dispatch(body: Bytes, head: &StubHead) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(head.status).unwrap_or(StatusCode::OK);
    let body_len = body.len();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &head.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("Skipping invalid stub header name {:?}", name);
            continue;
        };
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        let Ok(value) = HeaderValue::from_str(value) else {
            debug!("Skipping invalid value for stub header {}", name);
            continue;
        };
        headers.append(name, value);
    }

    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }
    response
}

/// [`dispatch`] with the head in its stored text form.
///
/// A head that does not parse is replaced by the default head.
pub fn dispatch_serialized(body: Bytes, head_text: &str) -> Response<Full<Bytes>> {
    let head = StubHead::parse(head_text).unwrap_or_else(|e| {
        warn!("Unreadable stub head, using defaults: {}", e);
        StubHead::default()
    });
    dispatch(body, &head)
}

/// Synthesized 500 for failures while serving a request.
pub fn error_stub(err: &dyn Display) -> Stub {
    let mut head = StubHead::with_status(500);
    head.push(CONNECTION.as_str(), "close");
    Stub {
        body: Bytes::from(format!("Something bad happened: {err}\n")),
        head,
    }
}

pub fn error_response(err: &dyn Display) -> Response<Full<Bytes>> {
    let stub = error_stub(err);
    dispatch(stub.body, &stub.head)
}
