//! Header names the proxy adds or rewrites.

use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use hyper::Response;

/// Names the hook that produced a response.
pub static X_STUB_PROXY_HOOK: HeaderName = HeaderName::from_static("x-stub-proxy-hook");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

pub static VALUE_CLOSE: HeaderValue = HeaderValue::from_static("close");

/// Extension trait for setting proxy headers on responses.
pub trait ProxyHeadersExt {
    /// Returns false if `value` is not a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> ProxyHeadersExt for Response<B> {
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}

/// Append the client address to `x-forwarded-for`.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}

/// A `connection` header coming back from the origin describes the
/// origin connection, which is always closed. Replace it with what the
/// client asked for, or `close` if it asked for nothing.
pub fn mirror_connection(response_headers: &mut HeaderMap, request_headers: &HeaderMap) {
    if !response_headers.contains_key(CONNECTION) {
        return;
    }
    let value = request_headers
        .get(CONNECTION)
        .cloned()
        .unwrap_or_else(|| VALUE_CLOSE.clone());
    response_headers.insert(CONNECTION, value);
}
