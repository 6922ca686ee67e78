//! Radio Control Channel
//!
//! Control-operation interface to the radio subsystem: availability checks,
//! neighbor-list publication, and handover resource allocation. The real
//! implementation talks to the transceiver stack; tests substitute a mock.

use async_trait::async_trait;
use tracing::{debug, info};

/// A neighbor cell entry as published to the radio subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborListEntry {
    /// Neighbor ARFCN
    pub arfcn: u16,
    /// Neighbor BSIC (NCC in high 3 bits, BCC in low 3 bits)
    pub bsic: u8,
    /// Neighbor cell identity
    pub cell_id: u32,
}

/// Control channel into the radio subsystem.
#[async_trait]
pub trait RadioControl: Send + Sync {
    /// Whether the local radio is up and serving.
    async fn is_available(&self) -> bool;

    /// Publishes the neighbor list (already sorted) to the radio.
    async fn push_neighbor_list(&self, entries: Vec<NeighborListEntry>);

    /// Requests a traffic channel for an inbound handover. Returns true
    /// when the resource was granted for the given reference.
    async fn allocate_handover_channel(&self, reference: u8) -> bool;
}

/// Radio control stand-in for deployments where no transceiver control
/// socket is wired up yet: the radio reports up, every handover channel is
/// granted, and neighbor publications are logged.
pub struct LocalRadio;

#[async_trait]
impl RadioControl for LocalRadio {
    async fn is_available(&self) -> bool {
        true
    }

    async fn push_neighbor_list(&self, entries: Vec<NeighborListEntry>) {
        info!(count = entries.len(), "neighbor list published");
        for entry in &entries {
            debug!(
                arfcn = entry.arfcn,
                bsic = entry.bsic,
                cell_id = entry.cell_id,
                "neighbor entry"
            );
        }
    }

    async fn allocate_handover_channel(&self, reference: u8) -> bool {
        debug!(reference, "handover channel granted");
        true
    }
}
