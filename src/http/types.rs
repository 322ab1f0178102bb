use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, TransferError};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(TransferError::new(
                ErrorCode::InvalidMethod,
                format!("Unsupported HTTP method: {}", value),
            )),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = TransferError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Header map with case-insensitive names. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.0
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.trim().to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.0.iter()
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.0.iter().fold(0usize, |acc, (name, value)| {
            acc.saturating_add(name.capacity())
                .saturating_add(value.capacity())
        })
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl<'map> IntoIterator for &'map Headers {
    type Item = (&'map String, &'map String);
    type IntoIter = btree_map::Iter<'map, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BodyMode {
    #[default]
    None,
    Json,
    Text,
    Form,
    Raw,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Body {
    pub mode: BodyMode,
    pub content: String,
}

impl Body {
    pub fn new(mode: BodyMode, content: impl Into<String>) -> Self {
        Self {
            mode,
            content: content.into(),
        }
    }

    /// Bytes to put on the wire, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        match self.mode {
            BodyMode::None => None,
            BodyMode::Json | BodyMode::Text | BodyMode::Form | BodyMode::Raw => {
                if self.content.is_empty() {
                    None
                } else {
                    Some(self.content.as_str())
                }
            }
        }
    }

    #[must_use]
    pub const fn default_content_type(&self) -> Option<&'static str> {
        match self.mode {
            BodyMode::Json => Some("application/json"),
            BodyMode::Text => Some("text/plain"),
            BodyMode::Form => Some("application/x-www-form-urlencoded"),
            BodyMode::None | BodyMode::Raw => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Body,
    pub timeout_ms: u64,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_ssl: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            url: String::new(),
            headers: Headers::new(),
            body: Body::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            verify_ssl: true,
        }
    }
}

impl Request {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Timing breakdown of one transfer, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub total_ms: f64,
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub first_byte_ms: f64,
    pub download_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Response {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Headers,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub body_size: usize,
    pub timing: Timing,
}

impl Response {
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Exactly one of a response or a classified failure.
pub type TransferResult = Result<Response, TransferError>;

#[derive(Debug, Default)]
pub struct BatchResult {
    /// Outcomes in submission order.
    pub responses: Vec<TransferResult>,
    pub successful: usize,
    pub failed: usize,
    pub total_time_ms: f64,
}

impl BatchResult {
    pub(crate) fn from_outcomes(responses: Vec<TransferResult>, total_time_ms: f64) -> Self {
        let successful = responses.iter().filter(|outcome| outcome.is_ok()).count();
        let failed = responses.len().saturating_sub(successful);
        Self {
            responses,
            successful,
            failed,
            total_time_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventLoopStats {
    pub total_requests: u64,
    pub active_requests: usize,
    pub pending_requests: usize,
    pub completed_requests: u64,
}
