//! Inter-cell Handover
//!
//! Outbound handover negotiation toward neighbor cells, inbound handover
//! resource allocation, and the neighbor polling loop that keeps the radio
//! subsystem's neighbor list current.

mod coordinator;
mod task;

pub use coordinator::{
    HandoverAccept, HandoverCoordinator, InboundDialog, InboundHandover, Neighbor,
    OutboundHandover, OutboundState,
};
pub use task::HandoverTask;
