//! Response head: status code plus headers, with its on-disk text form.
//!
//! The text form is a JSON object mapping lowercase header names to values,
//! plus a numeric `code` field carrying the status:
//!
//! ```text
//! {"code":200,"content-type":"application/json","set-cookie":["a=1","b=2"]}
//! ```
//!
//! Repeated header names are stored as arrays.

use hyper::header::HeaderMap;
use hyper::StatusCode;
use serde_json::{Map, Value};

/// Name of the status field inside a serialized head.
pub const CODE_FIELD: &str = "code";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubHead {
    pub status: u16,
    /// Header pairs in arrival order; names are lowercase
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum HeadParseError {
    #[error("head is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("head must be a JSON object")]
    NotAnObject,
    #[error("invalid status code in head: {0}")]
    InvalidStatus(String),
}

impl Default for StubHead {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
        }
    }
}

impl StubHead {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Capture a head from a live response. Values that are not valid UTF-8
    /// cannot be represented in the text form and are skipped.
    pub fn from_parts(status: StatusCode, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            status: status.as_u16(),
            headers,
        }
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_lowercase(), value.into()));
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Replace all values of a header with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.push(name, value);
    }

    /// Serialize to the on-disk text form.
    pub fn to_text(&self) -> String {
        let mut map = Map::new();
        for (name, value) in &self.headers {
            match map.get_mut(name) {
                Some(Value::Array(values)) => values.push(Value::String(value.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value.clone())]);
                }
                None => {
                    map.insert(name.clone(), Value::String(value.clone()));
                }
            }
        }
        map.insert(CODE_FIELD.to_string(), Value::from(self.status));
        Value::Object(map).to_string()
    }

    /// Parse the on-disk text form.
    pub fn parse(text: &str) -> Result<Self, HeadParseError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(HeadParseError::NotAnObject);
        };

        let mut head = Self::default();
        for (name, value) in map {
            if name == CODE_FIELD {
                head.status = match &value {
                    Value::Number(n) => n
                        .as_u64()
                        .and_then(|n| u16::try_from(n).ok())
                        .filter(|n| StatusCode::from_u16(*n).is_ok())
                        .ok_or_else(|| HeadParseError::InvalidStatus(n.to_string()))?,
                    Value::String(s) => parse_status(s)?,
                    other => return Err(HeadParseError::InvalidStatus(other.to_string())),
                };
                continue;
            }
            let name = name.to_lowercase();
            match value {
                Value::String(s) => head.headers.push((name, s)),
                Value::Array(values) => {
                    for v in values {
                        if let Some(s) = scalar_to_string(v) {
                            head.headers.push((name.clone(), s));
                        }
                    }
                }
                other => {
                    if let Some(s) = scalar_to_string(other) {
                        head.headers.push((name, s));
                    }
                }
            }
        }
        Ok(head)
    }
}

fn parse_status(raw: &str) -> Result<u16, HeadParseError> {
    raw.trim()
        .parse::<u16>()
        .ok()
        .filter(|n| StatusCode::from_u16(*n).is_ok())
        .ok_or_else(|| HeadParseError::InvalidStatus(raw.to_string()))
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
