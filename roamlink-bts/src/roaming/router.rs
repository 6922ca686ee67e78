//! Call / SMS / USSD Router
//!
//! Decides, per inbound routing request, whether the acting party is
//! locally attached (mobile-originated, forward to the core) or whether
//! the called party is a locally-attached subscriber (mobile-terminated,
//! deliver over the local cell). Handover continuations are recognized
//! first and handed to the handover coordinator.
//!
//! The router also owns the live-call table used for busy detection: a
//! mobile-terminated call toward a subscriber with a live call or an
//! in-flight outbound handover is refused with `Busy`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use roamlink_common::config::BtsConfig;
use roamlink_common::types::IdentityToken;
use roamlink_common::{Imsi, RoamingError, Tmsi};

use crate::handover::{HandoverCoordinator, InboundHandover};
use crate::nnsf::NodeSelector;
use crate::roaming::store::{Subscriber, SubscriberStore};

/// MO/MT SMS payload type for text transport.
pub const SMS_TEXT_TYPE: &str = "text/plain";
/// MO/MT SMS payload type for binary RPDU transport.
pub const SMS_BINARY_TYPE: &str = "application/vnd.3gpp.sms";

/// The acting party of a routing request, as far as the radio side knows it.
#[derive(Debug, Clone, Default)]
pub struct IdentityRef {
    /// Permanent identity, when the radio side has it
    pub imsi: Option<Imsi>,
    /// Temporary identity, when the radio side has it
    pub tmsi: Option<Tmsi>,
}

impl IdentityRef {
    /// Resolves the acting subscriber's IMSI: directly, or through the
    /// store's TMSI index.
    fn resolve_imsi(&self, store: &SubscriberStore) -> Option<Imsi> {
        if let Some(imsi) = &self.imsi {
            return Some(imsi.clone());
        }
        self.tmsi
            .and_then(|tmsi| store.find_by_tmsi(tmsi).map(|s| s.imsi.clone()))
    }
}

/// What kind of traffic a routing request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Voice call setup
    Call {
        /// Emergency call, routed to the SOS destination when configured
        emergency: bool,
    },
    /// Short message with its payload type
    Sms {
        /// Payload MIME type as received
        content_type: String,
    },
    /// Supplementary-service dialogue
    Ussd,
    /// Continuation of an inbound handover, addressed by reference
    HandoverContinuation {
        /// Handover reference previously issued to the peer
        reference: u8,
    },
}

/// One inbound routing request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Acting party
    pub identity: IdentityRef,
    /// Called party: digits, +digits, or an IMSI/TMSI token
    pub called: String,
    /// Dialog correlation, when the request belongs to a call
    pub call_id: Option<String>,
    /// Traffic kind
    pub kind: RouteKind,
}

/// Routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteVerdict {
    /// Forward to the core network at `destination`.
    MobileOriginated {
        /// SIP-style destination URI
        destination: String,
        /// Payload type to use on the outbound leg (SMS only)
        content_type: Option<String>,
    },
    /// Deliver to a locally-attached subscriber.
    MobileTerminated {
        /// The local subscriber
        imsi: Imsi,
        /// Local delivery URI
        delivery: String,
        /// Payload type to use on the delivery leg (SMS only)
        content_type: Option<String>,
    },
    /// Re-home the dialog captured by an inbound handover.
    HandoverContinuation(InboundHandover),
}

/// The router: dispatch logic plus the live-call table.
pub struct Router {
    config: Arc<BtsConfig>,
    selector: NodeSelector,
    calls: HashMap<Imsi, String>,
}

impl Router {
    /// Creates a router over the given configuration.
    pub fn new(config: Arc<BtsConfig>) -> Self {
        let selector = NodeSelector::from_config(&config);
        Self {
            config,
            selector,
            calls: HashMap::new(),
        }
    }

    /// Routes one request. Dispatch order: handover continuation, then
    /// mobile-originated (acting subscriber attached), then
    /// mobile-terminated (called party attached), then `Offline`.
    pub fn route(
        &mut self,
        store: &mut SubscriberStore,
        handover: &mut HandoverCoordinator,
        request: RouteRequest,
        now: u64,
    ) -> Result<RouteVerdict, RoamingError> {
        if let RouteKind::HandoverContinuation { reference } = request.kind {
            let inbound = handover.take_inbound(reference).ok_or_else(|| {
                RoamingError::ProtocolError(format!("no inbound handover for reference {reference}"))
            })?;
            debug!(reference, call_id = %inbound.call_id, "handover continuation resolved");
            return Ok(RouteVerdict::HandoverContinuation(inbound));
        }

        let acting = request
            .identity
            .resolve_imsi(store)
            .and_then(|imsi| store.find_by_imsi(&imsi).cloned())
            .filter(|sub| sub.is_attached(now));

        if let Some(subscriber) = acting {
            return self.route_mobile_originated(store, &subscriber.imsi, subscriber.tmsi, &request);
        }

        self.route_mobile_terminated(store, handover, &request)
    }

    /// Records a live call for busy detection.
    pub fn call_started(&mut self, imsi: Imsi, call_id: String) {
        self.calls.insert(imsi, call_id);
    }

    /// Clears a live call.
    pub fn call_ended(&mut self, imsi: &Imsi) {
        self.calls.remove(imsi);
    }

    /// Live call-id for a subscriber, if any.
    pub fn live_call(&self, imsi: &Imsi) -> Option<&str> {
        self.calls.get(imsi).map(String::as_str)
    }

    // ------------------------------------------------------------------
    // MO / MT legs
    // ------------------------------------------------------------------

    fn route_mobile_originated(
        &mut self,
        store: &mut SubscriberStore,
        imsi: &Imsi,
        tmsi: Option<Tmsi>,
        request: &RouteRequest,
    ) -> Result<RouteVerdict, RoamingError> {
        let node = self.core_destination(tmsi, &request.kind)?;

        let mut destination = format!("sip:{}@{}", request.called, node);
        // GSTN-bound calls carry the configured location tag for the
        // gateway's emergency/lawful routing.
        if is_gstn_number(&request.called) {
            if let Some(location) = &self.config.roaming.gstn_location {
                destination.push_str(";gstn-location=");
                destination.push_str(location);
            }
        }

        if let (RouteKind::Call { .. }, Some(call_id)) = (&request.kind, &request.call_id) {
            self.calls.insert(imsi.clone(), call_id.clone());
            // The persisted record carries the call-id too, so busy
            // detection survives across the handover coordinator.
            store.update(imsi, |sub| sub.call_id = Some(call_id.clone()));
        }

        let content_type = match &request.kind {
            RouteKind::Sms { .. } => Some(self.sms_content_type().to_string()),
            _ => None,
        };

        debug!(%imsi, %destination, "routed mobile-originated");
        Ok(RouteVerdict::MobileOriginated {
            destination,
            content_type,
        })
    }

    fn route_mobile_terminated(
        &mut self,
        store: &mut SubscriberStore,
        handover: &HandoverCoordinator,
        request: &RouteRequest,
    ) -> Result<RouteVerdict, RoamingError> {
        let subscriber = match store.find_called_party(&request.called) {
            Some(sub) => sub.clone(),
            None => {
                debug!(called = %request.called, "called party not attached here");
                return Err(RoamingError::Offline);
            }
        };

        let content_type = match &request.kind {
            RouteKind::Call { .. } => {
                if self.is_busy(&subscriber, handover) {
                    warn!(imsi = %subscriber.imsi, "refusing second call to busy subscriber");
                    return Err(RoamingError::Busy);
                }
                None
            }
            RouteKind::Sms { content_type } => {
                if content_type != SMS_TEXT_TYPE && content_type != SMS_BINARY_TYPE {
                    return Err(RoamingError::UnsupportedMedia(content_type.clone()));
                }
                Some(self.sms_content_type().to_string())
            }
            RouteKind::Ussd => None,
            RouteKind::HandoverContinuation { .. } => unreachable!("dispatched above"),
        };

        let token = match subscriber.tmsi {
            Some(tmsi) => IdentityToken::Tmsi(tmsi),
            None => IdentityToken::Imsi(subscriber.imsi.clone()),
        };
        let delivery = match &self.config.roaming.my_sip {
            Some(my_sip) => format!("sip:{token}@{my_sip}"),
            None => format!("sip:{token}@local"),
        };

        if let (RouteKind::Call { .. }, Some(call_id)) = (&request.kind, &request.call_id) {
            self.calls.insert(subscriber.imsi.clone(), call_id.clone());
            store.update(&subscriber.imsi, |sub| sub.call_id = Some(call_id.clone()));
        }

        debug!(imsi = %subscriber.imsi, %delivery, "routed mobile-terminated");
        Ok(RouteVerdict::MobileTerminated {
            imsi: subscriber.imsi,
            delivery,
            content_type,
        })
    }

    /// Core-network address for a mobile-originated leg. Emergency calls
    /// prefer the SOS destination; everything else goes through node
    /// selection. No address at all is a service failure, not a protocol
    /// one.
    fn core_destination(
        &self,
        tmsi: Option<Tmsi>,
        kind: &RouteKind,
    ) -> Result<String, RoamingError> {
        if let RouteKind::Call { emergency: true } = kind {
            if let Some(sos) = &self.config.roaming.sos_sip {
                return Ok(sos.clone());
            }
            warn!("emergency call without sos_sip, using normal core routing");
        }
        self.selector.select_node(tmsi).map_err(|e| match e {
            RoamingError::NoRegistrarConfigured => RoamingError::ServiceUnavailable,
            other => other,
        })
    }

    /// A subscriber is busy with a live call or with a call that is being
    /// handed over outbound right now.
    fn is_busy(&self, subscriber: &Subscriber, handover: &HandoverCoordinator) -> bool {
        if self.calls.contains_key(&subscriber.imsi) {
            return true;
        }
        subscriber
            .call_id
            .as_deref()
            .is_some_and(|call_id| handover.has_outbound(call_id))
    }

    fn sms_content_type(&self) -> &'static str {
        if self.config.roaming.text_sms {
            SMS_TEXT_TYPE
        } else {
            SMS_BINARY_TYPE
        }
    }
}

/// True for a dialable number (digits with an optional leading plus), as
/// opposed to an IMSI/TMSI token.
fn is_gstn_number(called: &str) -> bool {
    let digits = called.strip_prefix('+').unwrap_or(called);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
