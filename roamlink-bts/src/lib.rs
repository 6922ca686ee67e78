//! roamlink-bts - GSM Base-Station Roaming Signaling Bridge
#![allow(missing_docs)]
//!
//! This crate implements the signaling bridge between a GSM base station
//! and a SIP-based core network:
//!
//! - Registration and AKAv1-MD5 challenge/response authentication
//! - Call, SMS, and USSD routing (mobile-originated and -terminated)
//! - Inter-cell handover with neighbor polling and holdoff
//! - NNSF core-node selection over a hashed TMSI prefix
//! - Subscriber store with durable persistence
//! - Management CLI (`roaming ...` commands)
//!
//! # Architecture
//!
//! The bridge uses an actor-based task model where each component runs as
//! an independent async task communicating via typed message channels:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    roam-bts                          │
//! │  ┌─────────┐   ┌──────────┐   ┌───────────┐          │
//! │  │   App   │   │ Roaming  │   │ Handover  │          │
//! │  │  Task   │   │  Task    │   │  Task     │          │
//! │  └────┬────┘   └────┬─────┘   └─────┬─────┘          │
//! │       └─────────────┴───────────────┘                │
//! │                     │                                │
//! └─────────────────────┼────────────────────────────────┘
//!                       ▼
//!              SIP core / peer cells
//! ```
//!
//! The roaming task owns the subscriber store, registration engine, and
//! router; the handover task owns neighbor polling and handover
//! negotiation; the app task answers management commands. Tasks are
//! managed by `TaskManager` with graceful shutdown coordination.

pub mod app;
pub mod handover;
pub mod nnsf;
pub mod radio;
pub mod roaming;
pub mod sip;
pub mod tasks;
pub mod transport;

// Re-export app module types
pub use app::{
    format_neighbors, format_nodes, format_subscribers, parse_cli_command, AppTask,
    BtsCliCommandType,
};

// Re-export handover module types
pub use handover::{
    HandoverAccept, HandoverCoordinator, HandoverTask, InboundDialog, InboundHandover, Neighbor,
    OutboundHandover, OutboundState,
};

// Re-export NNSF and radio types
pub use nnsf::NodeSelector;
pub use radio::{LocalRadio, NeighborListEntry, RadioControl};

// Re-export roaming module types
pub use roaming::{
    AuthCredentials, FilePersistence, IdentityRef, MemoryPersistence, OpCounters,
    RegisterOutcome, RegisterRequest, RegistrationEngine, RoamingTask, RouteKind, RouteRequest,
    RouteVerdict, Router, Subscriber, SubscriberPersistence, SubscriberStore, SMS_BINARY_TYPE,
    SMS_TEXT_TYPE,
};

// Re-export SIP abstraction types
pub use sip::{
    parse_associated_uri, parse_challenge, AssociatedUri, Challenge, SipBody, SipMethod,
    SipRequest, SipResponse, SipTransport, TransportError, CODE_PROXY_AUTH, CODE_TIMEOUT,
    CODE_UNAUTHORIZED,
};

// Re-export task framework types
pub use tasks::{
    AppMessage, BtsTaskBase, CliCommand, HandoverMessage, RoamingMessage, StatusType,
    StatusUpdate, Task, TaskError, TaskHandle, TaskId, TaskInfo, TaskManager, TaskMessage,
    TaskState, DEFAULT_CHANNEL_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT_MS,
    NEIGHBOR_POLL_INTERVAL_SECS, SWEEP_INTERVAL_SECS,
};

// Re-export the concrete transport
pub use transport::UdpSignalingChannel;
