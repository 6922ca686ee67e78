//! Handover Coordinator
//!
//! Tracks neighbor cells and in-progress handovers in both directions.
//!
//! Outbound: a call leaving this cell walks the candidate list in order,
//! skipping targets in holdoff, and takes the first acceptance. Exhausting
//! the list discards the attempt and the call continues unchanged; only an
//! explicit failure report puts the target into holdoff.
//!
//! Inbound: a peer's handover request allocates the next reference (mod
//! 256) and a radio resource; the stored dialog record is consumed by the
//! continuation request that re-homes the dialog.
//!
//! Neighbor polling runs round-robin over the non-static neighbors while
//! the local radio is available; statically provisioned entries keep their
//! pinned parameters. The sorted neighbor list is republished to the radio
//! only when a poll changes something.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use roamlink_common::config::{BtsConfig, NeighborSpec};

use crate::radio::{NeighborListEntry, RadioControl};
use crate::sip::{SipMethod, SipRequest, SipTransport};

/// Outbound handover state for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// Candidate negotiation in progress
    Requested,
    /// A target accepted; the call is moving
    Accepted,
}

/// An in-flight outbound handover, keyed by call-id.
#[derive(Debug, Clone)]
pub struct OutboundHandover {
    /// Dialog being moved
    pub call_id: String,
    /// Target peer address
    pub target: String,
    /// Current state
    pub state: OutboundState,
}

/// What an accepting target returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverAccept {
    /// The accepting peer
    pub target: String,
    /// Handover reference issued by the peer
    pub reference: Option<u8>,
    /// Channel description issued by the peer
    pub channel: Option<String>,
}

/// Dialog correlation data carried by an inbound handover request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDialog {
    /// Original dialog id
    pub call_id: String,
    /// Caller URI of the original dialog
    pub caller_uri: String,
    /// Callee URI of the original dialog
    pub callee_uri: String,
    /// Sequence number of the original dialog
    pub cseq: u32,
    /// Peer (prior endpoint) address, for the optional termination notice
    pub peer: String,
}

/// A granted inbound handover awaiting its continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundHandover {
    /// Reference issued to the peer
    pub reference: u8,
    /// Original dialog id
    pub call_id: String,
    /// Caller URI to re-home
    pub caller_uri: String,
    /// Callee URI to re-home
    pub callee_uri: String,
    /// Sequence number to continue from
    pub cseq: u32,
    /// Prior endpoint address
    pub peer: String,
}

/// A neighbor cell as known to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    /// Peer SIP address
    pub address: String,
    /// Advertised ARFCN (0 until discovered)
    pub arfcn: u16,
    /// Advertised BSIC
    pub bsic: u8,
    /// Advertised cell identity
    pub cell_id: u32,
    /// Last poll outcome
    pub active: bool,
    /// Holdoff deadline after a reported handover failure, unix seconds
    pub holdoff_until: Option<u64>,
    /// Statically provisioned entries keep their configured parameters and
    /// are skipped by the poll loop
    pub statically_provisioned: bool,
}

impl Neighbor {
    fn from_spec(spec: NeighborSpec) -> Self {
        let (arfcn, bsic, cell_id) = spec.cell.unwrap_or((0, 0, 0));
        Self {
            address: spec.address,
            arfcn,
            bsic,
            cell_id,
            active: spec.cell.is_some(),
            holdoff_until: None,
            statically_provisioned: spec.cell.is_some(),
        }
    }

    /// Whether this neighbor is currently held off.
    pub fn in_holdoff(&self, now: u64) -> bool {
        self.holdoff_until.is_some_and(|until| until > now)
    }
}

/// The handover coordinator.
pub struct HandoverCoordinator {
    config: Arc<BtsConfig>,
    neighbors: Vec<Neighbor>,
    outbound: HashMap<String, OutboundHandover>,
    inbound: HashMap<u8, InboundHandover>,
    next_reference: u8,
    poll_cursor: usize,
    radio_was_available: bool,
    published_initial: bool,
}

impl HandoverCoordinator {
    /// Creates a coordinator with neighbors seeded from configuration.
    /// Statically provisioned entries start active with their pinned
    /// parameters; the rest wait for a successful poll.
    pub fn new(config: Arc<BtsConfig>) -> Self {
        let neighbors = config
            .neighbor_specs()
            .into_iter()
            .map(Neighbor::from_spec)
            .collect();
        Self {
            config,
            neighbors,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            next_reference: 0,
            poll_cursor: 0,
            radio_was_available: true,
            published_initial: false,
        }
    }

    /// Snapshot of the neighbor table, for the CLI.
    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    /// True when an outbound handover is tracked for the call.
    pub fn has_outbound(&self, call_id: &str) -> bool {
        self.outbound.contains_key(call_id)
    }

    /// Consumes the inbound record for a continuation request. A reference
    /// resolves at most once.
    pub fn take_inbound(&mut self, reference: u8) -> Option<InboundHandover> {
        self.inbound.remove(&reference)
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Negotiates an outbound handover for `call_id` over the candidate
    /// list, in order. Candidates in holdoff are skipped without being
    /// contacted. Returns None when every candidate was skipped or
    /// declined; the call then proceeds unchanged.
    pub async fn handover_required(
        &mut self,
        transport: &dyn SipTransport,
        call_id: &str,
        candidates: &[String],
        now: u64,
    ) -> Option<HandoverAccept> {
        self.outbound.insert(
            call_id.to_string(),
            OutboundHandover {
                call_id: call_id.to_string(),
                target: String::new(),
                state: OutboundState::Requested,
            },
        );

        for candidate in candidates {
            if self
                .neighbor(candidate)
                .is_some_and(|n| n.in_holdoff(now))
            {
                debug!(target = %candidate, "skipping handover candidate in holdoff");
                continue;
            }

            let mut request = SipRequest::new(
                SipMethod::Info,
                candidate,
                &format!("sip:handover@{candidate}"),
            )
            .header("X-Handover-Call-ID", call_id);
            if let Some(reason) = &self.config.handover.reason {
                request = request.header("X-Handover-Reason", reason);
            }

            let response = match transport.transaction(request).await {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(target = %candidate, "handover request failed: {e}");
                    continue;
                }
            };
            if !response.is_success() {
                debug!(target = %candidate, code = response.code, "handover declined");
                continue;
            }

            let accept = HandoverAccept {
                target: candidate.clone(),
                reference: response
                    .get_header("x-handover-reference")
                    .and_then(|v| v.parse().ok()),
                channel: response.get_header("x-channel").map(str::to_string),
            };
            if let Some(record) = self.outbound.get_mut(call_id) {
                record.target = candidate.clone();
                record.state = OutboundState::Accepted;
            }
            info!(%call_id, target = %candidate, "handover accepted");
            return Some(accept);
        }

        // Exhausted: discard the attempt, the call continues where it is.
        self.outbound.remove(call_id);
        debug!(%call_id, "no handover candidate accepted");
        None
    }

    /// Drops the outbound record for a finished call. A completed handover
    /// gets no failure report, so this is where an accepted record leaves
    /// the map.
    pub fn call_ended(&mut self, call_id: &str) {
        if self.outbound.remove(call_id).is_some() {
            debug!(%call_id, "outbound handover record cleared");
        }
    }

    /// Handles an explicit handover failure report: the outbound record is
    /// cleared and the failed target goes into holdoff.
    pub fn handover_failure(&mut self, call_id: &str, reason: &str, now: u64) {
        let Some(record) = self.outbound.remove(call_id) else {
            debug!(%call_id, "failure report for unknown handover");
            return;
        };
        let holdoff = u64::from(self.config.holdoff_secs());
        warn!(
            %call_id,
            target = %record.target,
            reason,
            holdoff_secs = holdoff,
            "handover failed, holding off target"
        );
        if let Some(neighbor) = self.neighbor_mut(&record.target) {
            neighbor.holdoff_until = Some(now + holdoff);
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Handles a peer's handover request: allocates the next reference and
    /// a radio resource. Returns the reference on grant.
    pub async fn inbound_request(
        &mut self,
        radio: &dyn RadioControl,
        dialog: InboundDialog,
    ) -> Option<u8> {
        let reference = self.next_reference;
        self.next_reference = self.next_reference.wrapping_add(1);

        if !radio.allocate_handover_channel(reference).await {
            warn!(reference, call_id = %dialog.call_id, "no radio resource for inbound handover");
            return None;
        }

        info!(reference, call_id = %dialog.call_id, "inbound handover granted");
        self.inbound.insert(
            reference,
            InboundHandover {
                reference,
                call_id: dialog.call_id,
                caller_uri: dialog.caller_uri,
                callee_uri: dialog.callee_uri,
                cseq: dialog.cseq,
                peer: dialog.peer,
            },
        );
        Some(reference)
    }

    // ------------------------------------------------------------------
    // Neighbor polling
    // ------------------------------------------------------------------

    /// One poll cycle: checks radio availability, polls the next neighbor
    /// round-robin, and republishes the neighbor list to the radio when
    /// anything changed. Returns true when a republication happened.
    pub async fn poll_tick(
        &mut self,
        transport: &dyn SipTransport,
        radio: &dyn RadioControl,
    ) -> bool {
        if !radio.is_available().await {
            // Polling halts while the radio is down; the transition marks
            // every neighbor inactive.
            if self.radio_was_available {
                self.radio_was_available = false;
                let any_active = self.neighbors.iter().any(|n| n.active);
                for neighbor in &mut self.neighbors {
                    neighbor.active = false;
                }
                if any_active {
                    warn!("radio unavailable, marking all neighbors inactive");
                    self.publish_neighbors(radio).await;
                    return true;
                }
            }
            return false;
        }
        self.radio_was_available = true;

        // A statically provisioned table is never touched by polling, so
        // the seed list goes out on the first available tick.
        if !self.published_initial {
            self.published_initial = true;
            if self.neighbors.iter().any(|n| n.active) {
                self.publish_neighbors(radio).await;
                return true;
            }
        }

        let pollable: Vec<usize> = self
            .neighbors
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.statically_provisioned)
            .map(|(i, _)| i)
            .collect();
        let Some(&index) = pollable.get(self.poll_cursor % pollable.len().max(1)) else {
            return false;
        };
        self.poll_cursor = self.poll_cursor.wrapping_add(1);

        let address = self.neighbors[index].address.clone();
        let request = SipRequest::new(
            SipMethod::Options,
            &address,
            &format!("sip:ping@{address}"),
        );
        let polled = match transport.transaction(request).await {
            Ok(resp) if resp.is_success() => {
                let n = &self.neighbors[index];
                Neighbor {
                    active: true,
                    arfcn: resp
                        .get_header("x-arfcn")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(n.arfcn),
                    bsic: resp
                        .get_header("x-bsic")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(n.bsic),
                    cell_id: resp
                        .get_header("x-cell-id")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(n.cell_id),
                    ..n.clone()
                }
            }
            _ => Neighbor {
                active: false,
                ..self.neighbors[index].clone()
            },
        };

        let changed = polled != self.neighbors[index];
        if changed {
            debug!(
                address = %polled.address,
                active = polled.active,
                arfcn = polled.arfcn,
                "neighbor state changed"
            );
            self.neighbors[index] = polled;
            self.publish_neighbors(radio).await;
        }
        changed
    }

    /// Pushes the active-neighbor list to the radio, sorted by ARFCN with
    /// undiscovered (ARFCN 0) entries last.
    async fn publish_neighbors(&self, radio: &dyn RadioControl) {
        let mut entries: Vec<NeighborListEntry> = self
            .neighbors
            .iter()
            .filter(|n| n.active)
            .map(|n| NeighborListEntry {
                arfcn: n.arfcn,
                bsic: n.bsic,
                cell_id: n.cell_id,
            })
            .collect();
        entries.sort_by_key(|e| if e.arfcn == 0 { u32::MAX } else { u32::from(e.arfcn) });
        debug!(count = entries.len(), "publishing neighbor list");
        radio.push_neighbor_list(entries).await;
    }

    fn neighbor(&self, address: &str) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.address == address)
    }

    fn neighbor_mut(&mut self, address: &str) -> Option<&mut Neighbor> {
        self.neighbors.iter_mut().find(|n| n.address == address)
    }
}
