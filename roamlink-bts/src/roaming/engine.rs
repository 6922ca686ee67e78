//! Registration / Authentication Engine
//!
//! Builds outbound REGISTER-equivalent transactions, tracks the
//! challenge/response exchange per subscriber identity, and updates the
//! subscriber store on success.
//!
//! # Challenge lifecycle
//!
//! A 401-equivalent response creates a [`PendingChallenge`] keyed by the
//! subscriber identity. The challenge pins the node the exchange started
//! on and is consumed (deleted) the moment an authenticated retry is
//! built: a nonce is single-use, and a second attempt against the same
//! nonce fails.
//!
//! # Re-registration policy
//!
//! The local periodic update interval (T3212) must stay under half the
//! server-granted expiry, otherwise subscribers would go stale on the core
//! between updates. A violating grant triggers an immediate deregistration
//! and a `LocationAreaNotAllowed` rejection toward the radio side. This is
//! a deliberate policy decision, not a transient failure.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use roamlink_common::config::BtsConfig;
use roamlink_common::types::IdentityToken;
use roamlink_common::{Imsi, Msisdn, RoamingError, Tmsi};

use crate::nnsf::NodeSelector;
use crate::roaming::store::{Subscriber, SubscriberStore};
use crate::sip::{
    parse_associated_uri, parse_challenge, SipMethod, SipRequest, SipTransport, TransportError,
    CODE_PROXY_AUTH, CODE_TIMEOUT, CODE_UNAUTHORIZED,
};

/// The only challenge algorithm the bridge accepts.
pub const EXPECTED_ALGORITHM: &str = "AKAv1-MD5";

/// A stored, single-use authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Server nonce
    pub nonce: String,
    /// Authentication realm
    pub realm: String,
    /// Core node the challenge came from; the authenticated retry goes back
    /// to the same node
    pub node: String,
}

/// Credentials computed by the radio side for an authenticated retry.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    /// Digest response value
    pub response: String,
}

/// A registration attempt from the radio side.
#[derive(Debug, Clone, Default)]
pub struct RegisterRequest {
    /// Permanent identity, when known
    pub imsi: Option<Imsi>,
    /// Temporary identity, when known
    pub tmsi: Option<Tmsi>,
    /// Equipment identity
    pub imei: Option<String>,
    /// Requested expiry in seconds; None uses the configured default
    pub expiry_secs: Option<u32>,
    /// Credentials for an authenticated retry after a challenge
    pub credentials: Option<AuthCredentials>,
    /// Optional warning text forwarded to the core
    pub warning: Option<String>,
}

impl RegisterRequest {
    /// The identity token used in URIs and as the challenge key.
    pub fn identity_token(&self) -> Result<IdentityToken, RoamingError> {
        if let Some(imsi) = &self.imsi {
            return Ok(IdentityToken::Imsi(imsi.clone()));
        }
        if let Some(tmsi) = self.tmsi {
            return Ok(IdentityToken::Tmsi(tmsi));
        }
        Err(RoamingError::IdentityMissing)
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Registration accepted; the subscriber store has been updated.
    Registered {
        /// Resolved permanent identity
        imsi: Imsi,
        /// Temporary identity after this registration
        tmsi: Option<Tmsi>,
        /// Subscriber number from the associated URI
        msisdn: Msisdn,
        /// Absolute expiry, unix seconds
        expires: u64,
    },
    /// The core issued a challenge; the caller must compute credentials
    /// and re-attempt.
    ChallengeIssued {
        /// Server nonce
        nonce: String,
        /// Authentication realm
        realm: String,
    },
}

/// The registration/auth engine.
pub struct RegistrationEngine {
    config: Arc<BtsConfig>,
    selector: NodeSelector,
    challenges: HashMap<String, PendingChallenge>,
}

impl RegistrationEngine {
    /// Creates an engine over the given configuration.
    pub fn new(config: Arc<BtsConfig>) -> Self {
        let selector = NodeSelector::from_config(&config);
        Self {
            config,
            selector,
            challenges: HashMap::new(),
        }
    }

    /// The engine's node selector, shared with the router.
    pub fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    /// Pending challenge for an identity, if any.
    pub fn pending_challenge(&self, key: &str) -> Option<&PendingChallenge> {
        self.challenges.get(key)
    }

    /// Registers a subscriber with the core network.
    pub async fn register(
        &mut self,
        store: &mut SubscriberStore,
        transport: &dyn SipTransport,
        request: RegisterRequest,
        now: u64,
    ) -> Result<RegisterOutcome, RoamingError> {
        let token = request.identity_token()?;
        let key = token.to_string();

        // Node choice: a challenge in flight pins the node; otherwise NNSF
        // by TMSI; otherwise the static registrar.
        let node = match self.challenges.get(&key) {
            Some(challenge) => challenge.node.clone(),
            None => self.selector.select_node(request.tmsi)?,
        };

        let expiry_secs = request.expiry_secs.unwrap_or(self.config.roaming.expires);
        let is_auth_retry = request.credentials.is_some();

        let sip_request = self.build_register(&token, &node, expiry_secs, &request)?;
        debug!(identity = %key, node = %node, expiry_secs, auth = is_auth_retry, "sending REGISTER");

        let (response, node) = match transport.transaction(sip_request).await {
            Ok(resp) if resp.code == CODE_TIMEOUT => {
                self.retry_on_other_node(transport, &token, &node, expiry_secs, &request, is_auth_retry)
                    .await?
            }
            Ok(resp) => (resp, node),
            Err(TransportError::Timeout) => {
                self.retry_on_other_node(transport, &token, &node, expiry_secs, &request, is_auth_retry)
                    .await?
            }
            Err(TransportError::Failed(e)) => return Err(RoamingError::ProtocolError(e)),
        };

        if response.code == CODE_UNAUTHORIZED || response.code == CODE_PROXY_AUTH {
            return self.handle_challenge(&key, &node, &response);
        }

        if response.is_success() {
            return self
                .handle_success(store, transport, &request, &node, &response, expiry_secs, now)
                .await;
        }

        Err(RoamingError::ProtocolError(format!(
            "registration rejected with code {}",
            response.code
        )))
    }

    /// Deregisters a subscriber (expires=0 REGISTER). Failures are logged
    /// and swallowed: the local record is authoritative at this point.
    pub async fn unregister(
        &self,
        transport: &dyn SipTransport,
        token: &IdentityToken,
        node: &str,
    ) {
        let uri = format!("sip:{token}@{node}");
        let request = SipRequest::new(SipMethod::Register, node, &uri)
            .header("Expires", "0")
            .header("Contact", &self.contact_header());
        if let Err(e) = transport.transaction(request).await {
            warn!(identity = %token, "deregistration transaction failed: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn build_register(
        &mut self,
        token: &IdentityToken,
        node: &str,
        expiry_secs: u32,
        request: &RegisterRequest,
    ) -> Result<SipRequest, RoamingError> {
        let uri = format!("sip:{token}@{node}");
        let mut sip_request = SipRequest::new(SipMethod::Register, node, &uri)
            .header("Expires", &expiry_secs.to_string())
            .header("Contact", &self.contact_header());

        if let Some(imei) = &request.imei {
            sip_request = sip_request.header("X-IMEI", imei);
        }
        if let Some(warning) = &request.warning {
            sip_request = sip_request.header("Warning", warning);
        }

        if let Some(credentials) = &request.credentials {
            // Consuming the challenge here makes the nonce single-use.
            let challenge = self
                .challenges
                .remove(&token.to_string())
                .ok_or_else(|| {
                    RoamingError::ProtocolError("no pending challenge for credentials".into())
                })?;
            sip_request = sip_request.header(
                "Authorization",
                &format!(
                    r#"Digest username="{token}", realm="{}", nonce="{}", response="{}", algorithm={EXPECTED_ALGORITHM}"#,
                    challenge.realm, challenge.nonce, credentials.response
                ),
            );
        }

        Ok(sip_request)
    }

    /// One-shot retry against a different node after a registration (not
    /// auth) timeout. The failed node is excluded from the draw.
    async fn retry_on_other_node(
        &mut self,
        transport: &dyn SipTransport,
        token: &IdentityToken,
        failed_node: &str,
        expiry_secs: u32,
        request: &RegisterRequest,
        is_auth_retry: bool,
    ) -> Result<(crate::sip::SipResponse, String), RoamingError> {
        if is_auth_retry {
            // An authenticated retry is pinned to the challenging node;
            // there is nothing sensible to retry against.
            return Err(RoamingError::Timeout);
        }
        let other = self
            .selector
            .select_other_node(failed_node)
            .ok_or(RoamingError::Timeout)?;
        info!(failed = %failed_node, retry = %other, "registration timed out, retrying on alternate node");

        let sip_request = self.build_register(token, &other, expiry_secs, request)?;
        match transport.transaction(sip_request).await {
            Ok(resp) if resp.code == CODE_TIMEOUT => Err(RoamingError::Timeout),
            Ok(resp) => Ok((resp, other)),
            Err(TransportError::Timeout) => Err(RoamingError::Timeout),
            Err(TransportError::Failed(e)) => Err(RoamingError::ProtocolError(e)),
        }
    }

    fn handle_challenge(
        &mut self,
        key: &str,
        node: &str,
        response: &crate::sip::SipResponse,
    ) -> Result<RegisterOutcome, RoamingError> {
        let header = response
            .get_header("www-authenticate")
            .or_else(|| response.get_header("proxy-authenticate"))
            .ok_or_else(|| RoamingError::MalformedResponse("challenge without header".into()))?;
        let challenge = parse_challenge(header)
            .ok_or_else(|| RoamingError::MalformedResponse("unparsable challenge".into()))?;

        if challenge.algorithm != EXPECTED_ALGORITHM {
            warn!(
                identity = %key,
                algorithm = %challenge.algorithm,
                "challenge with unsupported algorithm"
            );
            return Err(RoamingError::UnsupportedAlgorithm(challenge.algorithm));
        }

        debug!(identity = %key, realm = %challenge.realm, "challenge stored, credentials required");
        self.challenges.insert(
            key.to_string(),
            PendingChallenge {
                nonce: challenge.nonce.clone(),
                realm: challenge.realm.clone(),
                node: node.to_string(),
            },
        );

        Ok(RegisterOutcome::ChallengeIssued {
            nonce: challenge.nonce,
            realm: challenge.realm,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_success(
        &mut self,
        store: &mut SubscriberStore,
        transport: &dyn SipTransport,
        request: &RegisterRequest,
        node: &str,
        response: &crate::sip::SipResponse,
        requested_expiry: u32,
        now: u64,
    ) -> Result<RegisterOutcome, RoamingError> {
        let associated = response
            .get_header("p-associated-uri")
            .map(parse_associated_uri)
            .unwrap_or_default();

        let msisdn = associated
            .msisdn
            .ok_or_else(|| RoamingError::MalformedResponse("no MSISDN in associated URI".into()))?;

        let granted: u64 = response
            .get_header("expires")
            .and_then(|v| v.parse().ok())
            .unwrap_or(u64::from(requested_expiry));

        // The local periodic update must fit twice into the granted expiry.
        let t3212 = u64::from(self.config.timer.t3212);
        if t3212 != 0 && granted < 2 * t3212 {
            warn!(
                granted,
                t3212,
                "granted expiry shorter than twice the re-registration interval, rejecting area"
            );
            if let Ok(token) = request.identity_token() {
                self.unregister(transport, &token, node).await;
            }
            return Err(RoamingError::LocationAreaNotAllowed);
        }

        let (assoc_imsi, assoc_tmsi) = match associated.identity {
            Some(IdentityToken::Imsi(imsi)) => (Some(imsi), None),
            Some(IdentityToken::Tmsi(tmsi)) => (None, Some(tmsi)),
            None => (None, None),
        };

        let imsi = request
            .imsi
            .clone()
            .or(assoc_imsi)
            .or_else(|| {
                request
                    .tmsi
                    .and_then(|t| store.find_by_tmsi(t).map(|s| s.imsi.clone()))
            })
            .ok_or_else(|| {
                RoamingError::MalformedResponse("cannot resolve IMSI for registration".into())
            })?;
        let tmsi = assoc_tmsi.or(request.tmsi);
        let expires = now + granted;

        let call_id = store.find_by_imsi(&imsi).and_then(|s| s.call_id.clone());
        store.upsert(Subscriber {
            imsi: imsi.clone(),
            tmsi,
            imei: request.imei.clone(),
            msisdn: Some(msisdn.clone()),
            expires,
            call_id,
        });
        info!(%imsi, %msisdn, expires, "subscriber registered");

        Ok(RegisterOutcome::Registered {
            imsi,
            tmsi,
            msisdn,
            expires,
        })
    }

    fn contact_header(&self) -> String {
        match &self.config.roaming.my_sip {
            Some(my_sip) => format!("<sip:{my_sip}>"),
            None => "<sip:unconfigured>".to_string(),
        }
    }
}
