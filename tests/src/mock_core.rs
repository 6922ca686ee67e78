//! Mock SIP core for integration testing
//!
//! Plays the registrar, the routing core, and peer cells behind one
//! [`SipTransport`] seam. Behavior is configured per scenario: subscriber
//! provisioning, digest challenges, granted expiry, per-target timeouts,
//! neighbor cell parameters, and handover acceptance.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use roamlink_bts::sip::{uri_user, SipMethod, SipRequest, SipResponse, SipTransport, TransportError};

/// A subscriber known to the core.
#[derive(Debug, Clone)]
struct Provisioned {
    /// MSISDN returned in the associated URI
    msisdn: String,
    /// Identity token (`TMSI...`/`IMSI...`) returned alongside, if any
    identity: Option<String>,
}

/// Advertised parameters of a peer cell, answered on OPTIONS polls.
#[derive(Debug, Clone, Copy)]
pub struct CellParams {
    pub arfcn: u16,
    pub bsic: u8,
    pub cell_id: u32,
}

#[derive(Default)]
struct Inner {
    directory: HashMap<String, Provisioned>,
    require_auth: bool,
    algorithm: String,
    granted_expires: Option<u32>,
    nonce_seq: u64,
    timeout_targets: HashSet<String>,
    down_targets: HashSet<String>,
    cells: HashMap<String, CellParams>,
    handover_accepts: HashMap<String, u8>,
    requests: Vec<SipRequest>,
}

/// The mock core. Clone-cheap; all clones share state.
#[derive(Clone)]
pub struct MockSipCore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockSipCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSipCore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                algorithm: "AKAv1-MD5".to_string(),
                ..Inner::default()
            })),
        }
    }

    /// Provisions a subscriber: registrations for `token` succeed and the
    /// associated URI carries `msisdn` (and `identity` when given).
    pub fn provision(&self, token: &str, msisdn: &str, identity: Option<&str>) {
        self.inner.lock().unwrap().directory.insert(
            token.to_string(),
            Provisioned {
                msisdn: msisdn.to_string(),
                identity: identity.map(str::to_string),
            },
        );
    }

    /// Makes the core challenge every unauthenticated registration.
    pub fn require_auth(&self, on: bool) {
        self.inner.lock().unwrap().require_auth = on;
    }

    /// Sets the algorithm advertised in challenges.
    pub fn set_algorithm(&self, algorithm: &str) {
        self.inner.lock().unwrap().algorithm = algorithm.to_string();
    }

    /// Grants this expiry instead of echoing the requested one.
    pub fn set_granted_expires(&self, secs: u32) {
        self.inner.lock().unwrap().granted_expires = Some(secs);
    }

    /// Every transaction to `target` times out.
    pub fn fail_target(&self, target: &str) {
        self.inner
            .lock()
            .unwrap()
            .timeout_targets
            .insert(target.to_string());
    }

    /// OPTIONS polls to `target` are answered 503.
    pub fn mark_down(&self, target: &str) {
        self.inner
            .lock()
            .unwrap()
            .down_targets
            .insert(target.to_string());
    }

    /// OPTIONS polls to `target` advertise these cell parameters.
    pub fn set_cell(&self, target: &str, params: CellParams) {
        self.inner
            .lock()
            .unwrap()
            .cells
            .insert(target.to_string(), params);
    }

    /// Handover requests to `target` are accepted with `reference`; all
    /// other targets decline.
    pub fn accept_handover(&self, target: &str, reference: u8) {
        self.inner
            .lock()
            .unwrap()
            .handover_accepts
            .insert(target.to_string(), reference);
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<SipRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Requests of one method, in order.
    pub fn requests_of(&self, method: SipMethod) -> Vec<SipRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    fn answer_register(inner: &mut Inner, request: &SipRequest) -> SipResponse {
        if request.get_header("Expires") == Some("0") {
            return SipResponse::new(200);
        }

        if inner.require_auth && request.get_header("Authorization").is_none() {
            inner.nonce_seq += 1;
            let challenge = format!(
                r#"Digest realm="core.test", nonce="nonce-{}", algorithm={}"#,
                inner.nonce_seq, inner.algorithm
            );
            return SipResponse::new(401).header("WWW-Authenticate", &challenge);
        }

        let user = match uri_user(&request.uri) {
            Some(user) => user.to_string(),
            None => return SipResponse::new(400),
        };
        let provisioned = match inner.directory.get(&user) {
            Some(p) => p.clone(),
            None => return SipResponse::new(404),
        };

        let mut associated = format!("<sip:{}@core.test>", provisioned.msisdn);
        if let Some(identity) = &provisioned.identity {
            associated.push_str(&format!(",<sip:{identity}@core.test>"));
        }

        let granted = inner
            .granted_expires
            .map(|e| e.to_string())
            .or_else(|| request.get_header("Expires").map(str::to_string))
            .unwrap_or_else(|| "3600".to_string());

        SipResponse::new(200)
            .header("Expires", &granted)
            .header("P-Associated-URI", &associated)
    }

    fn answer_options(inner: &Inner, request: &SipRequest) -> SipResponse {
        if inner.down_targets.contains(&request.target) {
            return SipResponse::new(503);
        }
        match inner.cells.get(&request.target) {
            Some(params) => SipResponse::new(200)
                .header("X-ARFCN", &params.arfcn.to_string())
                .header("X-BSIC", &params.bsic.to_string())
                .header("X-Cell-ID", &params.cell_id.to_string()),
            None => SipResponse::new(200),
        }
    }

    fn answer_info(inner: &Inner, request: &SipRequest) -> SipResponse {
        match inner.handover_accepts.get(&request.target) {
            Some(reference) => {
                SipResponse::new(200).header("X-Handover-Reference", &reference.to_string())
            }
            None => SipResponse::new(486),
        }
    }
}

#[async_trait]
impl SipTransport for MockSipCore {
    async fn transaction(&self, request: SipRequest) -> Result<SipResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.push(request.clone());

        if inner.timeout_targets.contains(&request.target) {
            return Err(TransportError::Timeout);
        }

        let response = match request.method {
            SipMethod::Register => Self::answer_register(&mut inner, &request),
            SipMethod::Options => Self::answer_options(&inner, &request),
            SipMethod::Info => Self::answer_info(&inner, &request),
            SipMethod::Message | SipMethod::Bye => SipResponse::new(200),
        };
        Ok(response)
    }
}
