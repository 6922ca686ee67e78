//! SIP Transaction Abstraction
//!
//! The bridge never touches SIP wire encoding; it builds typed requests and
//! interprets typed responses through the [`SipTransport`] seam. The real
//! transport lives outside this crate (the SIP channel of the surrounding
//! stack); tests substitute a mock.
//!
//! Header values the bridge cares about (authentication challenges, the
//! associated-URI of a registration response) are parsed into typed values
//! here. Missing optional headers yield `None`, never a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use roamlink_common::types::{IdentityToken, Msisdn};

/// Response code for a registrar challenge.
pub const CODE_UNAUTHORIZED: u16 = 401;
/// Response code for a proxy challenge, treated the same way.
pub const CODE_PROXY_AUTH: u16 = 407;
/// Response code for a transaction timeout surfaced by the transport layer.
pub const CODE_TIMEOUT: u16 = 408;

/// SIP-equivalent request methods the bridge issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SipMethod {
    /// Registration / deregistration
    Register,
    /// SMS and USSD payload delivery
    Message,
    /// Handover negotiation between BTS peers
    Info,
    /// Neighbor availability poll
    Options,
    /// Dialog termination notice
    Bye,
}

impl std::fmt::Display for SipMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SipMethod::Register => write!(f, "REGISTER"),
            SipMethod::Message => write!(f, "MESSAGE"),
            SipMethod::Info => write!(f, "INFO"),
            SipMethod::Options => write!(f, "OPTIONS"),
            SipMethod::Bye => write!(f, "BYE"),
        }
    }
}

/// Message body with its payload type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipBody {
    /// MIME type, e.g. `text/plain`
    pub content_type: String,
    /// Raw payload
    pub data: Vec<u8>,
}

/// An outbound SIP-equivalent request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipRequest {
    /// Request method
    pub method: SipMethod,
    /// Target address (ip:port of the core node or peer)
    pub target: String,
    /// Request URI
    pub uri: String,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Optional body
    pub body: Option<SipBody>,
}

impl SipRequest {
    /// Creates a request with no headers or body.
    pub fn new(method: SipMethod, target: &str, uri: &str) -> Self {
        Self {
            method,
            target: target.to_string(),
            uri: uri.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Attaches a body.
    pub fn body(mut self, content_type: &str, data: Vec<u8>) -> Self {
        self.body = Some(SipBody {
            content_type: content_type.to_string(),
            data,
        });
        self
    }

    /// First header value with the given name, case-insensitive.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response to an outbound transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipResponse {
    /// Response code (SIP-style: 2xx success, 401 challenge, 408 timeout)
    pub code: u16,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Optional body
    pub body: Option<SipBody>,
}

impl SipResponse {
    /// Creates a response with the given code and no headers.
    pub fn new(code: u16) -> Self {
        Self {
            code,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First header value with the given name, case-insensitive.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True for a 2xx response.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Transport-layer failure. Translated into a domain error before it
/// reaches the GSM side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No final response within the transaction's retransmission budget
    #[error("transaction timed out")]
    Timeout,
    /// The transport could not deliver the request at all
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Outbound transaction transport.
///
/// `transaction` blocks the calling handler until a final response or the
/// bounded retransmission budget is exhausted; it never waits indefinitely.
#[async_trait]
pub trait SipTransport: Send + Sync {
    /// Sends a request and waits for its final response.
    async fn transaction(&self, request: SipRequest) -> Result<SipResponse, TransportError>;
}

// ============================================================================
// Typed header parsing
// ============================================================================

/// Parsed authentication challenge from a 401-equivalent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Server nonce
    pub nonce: String,
    /// Authentication realm
    pub realm: String,
    /// Algorithm identifier, e.g. `AKAv1-MD5`
    pub algorithm: String,
}

/// Parses a `www-authenticate`-equivalent header value of the form
/// `Digest realm="...", nonce="...", algorithm=AKAv1-MD5`.
///
/// Returns None when nonce or realm is absent.
pub fn parse_challenge(value: &str) -> Option<Challenge> {
    let params = value.strip_prefix("Digest").unwrap_or(value).trim();

    let mut nonce = None;
    let mut realm = None;
    let mut algorithm = None;

    for part in params.split(',') {
        let (key, val) = match part.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        let val = val.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "nonce" => nonce = Some(val.to_string()),
            "realm" => realm = Some(val.to_string()),
            "algorithm" => algorithm = Some(val.to_string()),
            _ => {}
        }
    }

    Some(Challenge {
        nonce: nonce?,
        realm: realm?,
        algorithm: algorithm.unwrap_or_default(),
    })
}

/// Parsed associated-URI header from a 2xx registration response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssociatedUri {
    /// Subscriber MSISDN
    pub msisdn: Option<Msisdn>,
    /// TMSI-or-IMSI identity assigned by the core
    pub identity: Option<IdentityToken>,
}

/// Parses an associated-URI header listing one or more `<sip:user@host>`
/// entries, e.g.
/// `<sip:+15551234567@10.0.0.1>,<sip:TMSI4f1a2b3c@10.0.0.1>`.
///
/// The MSISDN is the first numeric user; the identity is the first user
/// carrying an IMSI/TMSI prefix. Either may be absent.
pub fn parse_associated_uri(value: &str) -> AssociatedUri {
    let mut parsed = AssociatedUri::default();

    for entry in value.split(',') {
        let user = match uri_user(entry) {
            Some(u) => u,
            None => continue,
        };
        if parsed.identity.is_none() {
            if let Some(token) = IdentityToken::parse(user) {
                parsed.identity = Some(token);
                continue;
            }
        }
        if parsed.msisdn.is_none() {
            if let Some(msisdn) = Msisdn::new(user) {
                parsed.msisdn = Some(msisdn);
            }
        }
    }

    parsed
}

/// Extracts the user part of a `<sip:user@host>` or `sip:user@host` entry.
pub fn uri_user(entry: &str) -> Option<&str> {
    let entry = entry.trim().trim_start_matches('<');
    let rest = entry
        .strip_prefix("sip:")
        .or_else(|| entry.strip_prefix("tel:"))?;
    let user = rest.split('@').next()?;
    let user = user.split(';').next()?;
    if user.is_empty() {
        None
    } else {
        Some(user)
    }
}
