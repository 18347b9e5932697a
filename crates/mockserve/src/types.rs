//! Type definitions shared by the mock server, its request helper and the
//! comparison helpers.
//!
//! This module contains the request/response data model, the header multimap
//! and every error type surfaced by the crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Headers
// ============================================================================

/// Ordered header multimap keyed by lower-cased header name.
///
/// Values keep the order in which they were added, so repeated headers
/// (e.g. several `Set-Cookie` lines) survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, Vec<String>>",
    into = "BTreeMap<String, Vec<String>>"
)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already present for `name`.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .entry(name.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(&name.to_ascii_lowercase()).map(Vec::as_slice)
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert a hyper/reqwest `HeaderMap`. Non UTF-8 values are decoded lossily.
    pub fn from_header_map(map: &hyper::HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }
}

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut headers = Self::new();
        for (name, values) in raw {
            for value in values {
                headers.append(&name, value);
            }
        }
        headers
    }
}

impl From<Headers> for BTreeMap<String, Vec<String>> {
    fn from(headers: Headers) -> Self {
        headers.0
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

// ============================================================================
// Request / Response Data
// ============================================================================

/// One HTTP request, either configured by a test or captured by the server.
///
/// `host` and `port` are only populated on captured requests and identify the
/// server that observed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub port: u16,
}

impl RequestData {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// A configured stub, or the response observed by the request helper.
///
/// Carries the same fields as [`RequestData`] plus the status to reply with and
/// an artificial delay held before the reply is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub port: u16,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(
        default,
        rename = "waitMs",
        with = "duration_ms",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub wait: Duration,
}

impl Default for ResponseData {
    fn default() -> Self {
        Self {
            uri: String::new(),
            method: String::new(),
            body: String::new(),
            headers: Headers::new(),
            host: String::new(),
            port: 0,
            status: default_status(),
            wait: Duration::ZERO,
        }
    }
}

impl ResponseData {
    pub fn new(method: impl Into<String>, uri: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            status,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// The client request that would hit this stub, carrying its body and headers.
    pub fn request(&self) -> RequestData {
        RequestData {
            uri: self.uri.clone(),
            method: self.method.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
            host: String::new(),
            port: 0,
        }
    }

    /// Whether this stub answers `method` + `uri`.
    /// Method comparison ignores ASCII case, the URI must match exactly.
    pub fn matches(&self, method: &str, uri: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.uri == uri
    }
}

fn default_status() -> u16 {
    200
}

fn is_zero_port(port: &u16) -> bool {
    *port == 0
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration rejected before the server binds
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Host must not be empty")]
    EmptyHost,
    #[error("Channel size must be at least 1")]
    ZeroChannelSize,
    #[error("Invalid method '{method}' in mode '{mode}'")]
    InvalidMethod { mode: String, method: String },
    #[error("Invalid URI '{uri}' in mode '{mode}': must start with '/'")]
    InvalidUri { mode: String, uri: String },
    #[error("Invalid status {status} for {method} {uri} in mode '{mode}'")]
    InvalidStatus {
        mode: String,
        method: String,
        uri: String,
        status: u16,
    },
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Server failed to start
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to bind {0}: {1}")]
    Bind(String, #[source] std::io::Error),
}

/// Waiting for a captured request did not produce one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("No request captured within {0:?}")]
    Timeout(Duration),
    #[error("Capture channel closed: server has shut down")]
    Closed,
}

/// Request helper failure
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid method: {0}")]
    InvalidMethod(String),
    #[error("Invalid header {0}")]
    InvalidHeader(String),
    #[error("Request to {addr} failed: {source}")]
    Transport {
        addr: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Address a server is reachable at, used for log lines and error messages.
pub(crate) fn display_addr(host: &str, port: u16) -> String {
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V6(ip)) => SocketAddr::from((ip, port)).to_string(),
        _ => format!("{host}:{port}"),
    }
}
