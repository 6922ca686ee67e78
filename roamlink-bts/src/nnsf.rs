//! NNSF Node Selection
//!
//! Deterministically routes a subscriber to one of several core-network
//! nodes by hashing the TMSI down to a table index. The same subscriber
//! always selects the same node while the table is unchanged. When the
//! hashed index has no configured node, selection degrades to a uniformly
//! random node from the table rather than failing — a deliberate
//! availability-over-consistency policy, logged so the resulting node
//! bouncing is operator-visible.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, warn};

use roamlink_common::config::BtsConfig;
use roamlink_common::{RoamingError, Tmsi};

/// Width of the hash value the selector index is taken from.
const HASH_BITS: u32 = 24;

/// Core-network node selector.
#[derive(Debug, Clone)]
pub struct NodeSelector {
    nodes: BTreeMap<u8, String>,
    bits: u8,
    registrar: Option<String>,
}

impl NodeSelector {
    /// Builds a selector from the roaming configuration.
    pub fn from_config(config: &BtsConfig) -> Self {
        Self {
            nodes: config.nnsf_nodes(),
            bits: config.roaming.nnsf_bits,
            registrar: config.roaming.reg_sip.clone(),
        }
    }

    /// Creates a selector from explicit parts.
    pub fn new(nodes: BTreeMap<u8, String>, bits: u8, registrar: Option<String>) -> Self {
        Self {
            nodes,
            bits,
            registrar,
        }
    }

    /// True when an NNSF node table is in effect.
    pub fn has_node_table(&self) -> bool {
        !self.nodes.is_empty() && self.bits > 0
    }

    /// The configured node table.
    pub fn nodes(&self) -> &BTreeMap<u8, String> {
        &self.nodes
    }

    /// Selects the core-network address for a subscriber.
    pub fn select_node(&self, tmsi: Option<Tmsi>) -> Result<String, RoamingError> {
        if self.has_node_table() {
            if let Some(tmsi) = tmsi {
                let index = self.node_index(tmsi);
                if let Some(addr) = self.nodes.get(&index) {
                    debug!(%tmsi, index, node = %addr, "NNSF selected node");
                    return Ok(addr.clone());
                }
                let addr = self.random_node();
                warn!(%tmsi, index, node = %addr, "NNSF index has no node, falling back to random node");
                return Ok(addr);
            }
            // No TMSI to hash yet (first contact); any node will do.
            let addr = self.random_node();
            debug!(node = %addr, "no TMSI for NNSF, using random node");
            return Ok(addr);
        }

        self.registrar
            .clone()
            .ok_or(RoamingError::NoRegistrarConfigured)
    }

    /// Picks a node different from `exclude`, drawing up to 100 times to
    /// find a distinct candidate. Returns None when no alternative exists.
    pub fn select_other_node(&self, exclude: &str) -> Option<String> {
        let candidates: Vec<&String> = if self.has_node_table() {
            self.nodes.values().collect()
        } else {
            self.registrar.iter().collect()
        };
        if candidates.len() < 2 {
            return None;
        }

        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let pick = candidates[rng.gen_range(0..candidates.len())];
            if pick != exclude {
                return Some(pick.clone());
            }
        }
        None
    }

    /// Table index for a TMSI: the top `bits` of a 24-bit hash.
    fn node_index(&self, tmsi: Tmsi) -> u8 {
        let mask = (1u32 << self.bits) - 1;
        ((hash24(tmsi.value()) >> (HASH_BITS - u32::from(self.bits))) & mask) as u8
    }

    fn random_node(&self) -> String {
        let mut rng = rand::thread_rng();
        let idx = rng.gen_range(0..self.nodes.len());
        self.nodes
            .values()
            .nth(idx)
            .cloned()
            .unwrap_or_default()
    }
}

/// Folds a 32-bit TMSI into a 24-bit hash. Deterministic; the prefix taken
/// by `node_index` keeps a subscriber pinned to one node across calls.
fn hash24(value: u32) -> u32 {
    let mixed = value ^ value.rotate_left(13) ^ value.rotate_right(7);
    (mixed ^ (mixed >> 8)) & 0x00FF_FFFF
}
