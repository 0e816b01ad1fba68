//! Captured interaction records.
//!
//! Each variant carries its own field set; the `source` discriminant is
//! written alongside them when serialized, e.g.
//! `{"source":"ssh","address":"203.0.113.9","time":1700000000,"user":"root",...}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One attacker interaction, as appended to the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum CapturedEvent {
    Http(HttpRequestCapture),
    Ssh(SshAuthCapture),
}

/// A request received by the HTTP decoy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestCapture {
    /// Remote IP, port stripped
    pub address: String,
    /// Unix seconds at capture
    pub time: i64,
    pub host: String,
    pub method: String,
    pub url: String,
    pub proto: String,
    /// Header name to values, in the order received
    pub header: BTreeMap<String, Vec<String>>,
    /// Request body, truncated to the configured cap
    pub body: String,
    /// Set when the body read failed or was truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A password authentication attempt received by the SSH decoy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshAuthCapture {
    pub address: String,
    pub time: i64,
    pub user: String,
    pub pass: String,
    pub client_ver: String,
}

/// Discriminant of a [`CapturedEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Http,
    Ssh,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Http => write!(f, "http"),
            Source::Ssh => write!(f, "ssh"),
        }
    }
}

impl CapturedEvent {
    pub fn source(&self) -> Source {
        match self {
            CapturedEvent::Http(_) => Source::Http,
            CapturedEvent::Ssh(_) => Source::Ssh,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            CapturedEvent::Http(h) => &h.address,
            CapturedEvent::Ssh(s) => &s.address,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            CapturedEvent::Http(h) => h.time,
            CapturedEvent::Ssh(s) => s.time,
        }
    }
}

impl From<HttpRequestCapture> for CapturedEvent {
    fn from(capture: HttpRequestCapture) -> Self {
        CapturedEvent::Http(capture)
    }
}

impl From<SshAuthCapture> for CapturedEvent {
    fn from(capture: SshAuthCapture) -> Self {
        CapturedEvent::Ssh(capture)
    }
}
