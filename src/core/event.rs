//! Emitted events
//!
//! Closed set of everything the pipeline can report. Subscribers register
//! by [`EventKind`], so adding a variant forces every match over kinds to
//! be revisited.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocols::mail::MailProtocol;

/// Header value; `Cookie` headers are expanded into their pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Cookies(BTreeMap<String, String>),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            HeaderValue::Cookies(_) => None,
        }
    }
}

/// Header map keyed by the name as seen on the wire
pub type Headers = BTreeMap<String, HeaderValue>;

/// Case-insensitive header lookup
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_text())
}

/// Session lifecycle endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

/// DNS question observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRequestEvent {
    pub id: Uuid,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// DNS answers observed
///
/// `id` is absent when no pending question carried the same wire id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsResponseEvent {
    pub id: Option<Uuid>,
    pub domains: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Body of a completed HTTP message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpBody {
    /// Raw bytes as captured (possibly compressed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer: Option<Vec<u8>>,
    /// Decompressed text, lossily decoded as UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestEvent {
    pub id: Uuid,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub country: String,
    pub headers: Headers,
    pub host: Option<String>,
    pub url: String,
    pub method: String,
    #[serde(flatten)]
    pub body: HttpBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseEvent {
    pub id: Uuid,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub country: String,
    pub headers: Headers,
    pub status: u16,
    #[serde(flatten)]
    pub body: HttpBody,
}

/// TLS connection metadata; payload is never read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsEvent {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Transcript of one mail session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailEvent {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub port: u16,
    pub protocol: MailProtocol,
    pub is_encrypted: bool,
    pub country: String,
    /// Plaintext transcript; always `None` on encrypted ports
    pub data: Option<String>,
    pub login_observed: bool,
}

/// A message or packet that could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolErrorEvent {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub protocol: String,
    pub reason: String,
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    Ready,
    Connect(SessionEvent),
    Disconnect(SessionEvent),
    DnsRequest(DnsRequestEvent),
    DnsResponse(DnsResponseEvent),
    HttpRequest(HttpRequestEvent),
    HttpResponse(HttpResponseEvent),
    HttpsObserved(HttpsEvent),
    Mail(MailEvent),
    ProtocolError(ProtocolErrorEvent),
}

/// Subscription key, one per [`Event`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ready,
    Connect,
    Disconnect,
    DnsRequest,
    DnsResponse,
    HttpRequest,
    HttpResponse,
    HttpsObserved,
    Mail,
    ProtocolError,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Ready,
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::DnsRequest,
        EventKind::DnsResponse,
        EventKind::HttpRequest,
        EventKind::HttpResponse,
        EventKind::HttpsObserved,
        EventKind::Mail,
        EventKind::ProtocolError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::DnsRequest => "dns_request",
            EventKind::DnsResponse => "dns_response",
            EventKind::HttpRequest => "http_request",
            EventKind::HttpResponse => "http_response",
            EventKind::HttpsObserved => "https_observed",
            EventKind::Mail => "mail",
            EventKind::ProtocolError => "protocol_error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Connect(_) => EventKind::Connect,
            Event::Disconnect(_) => EventKind::Disconnect,
            Event::DnsRequest(_) => EventKind::DnsRequest,
            Event::DnsResponse(_) => EventKind::DnsResponse,
            Event::HttpRequest(_) => EventKind::HttpRequest,
            Event::HttpResponse(_) => EventKind::HttpResponse,
            Event::HttpsObserved(_) => EventKind::HttpsObserved,
            Event::Mail(_) => EventKind::Mail,
            Event::ProtocolError(_) => EventKind::ProtocolError,
        }
    }

    /// Attach the sender's country to dispatcher-level events.
    ///
    /// Session-level events resolve their country when the session is
    /// created and are left untouched.
    pub fn with_country(mut self, country: String) -> Self {
        match &mut self {
            Event::DnsRequest(e) => e.country = Some(country),
            Event::DnsResponse(e) => e.country = Some(country),
            Event::HttpsObserved(e) => e.country = Some(country),
            _ => {}
        }
        self
    }
}
