//! Integration test framework for the roamlink signaling bridge
#![allow(missing_docs)]
//!
//! This crate provides test utilities and mock peers for integration
//! testing of the BTS bridge.
//!
//! # Components
//!
//! - [`mock_core`] - Mock SIP core (registrar + peer cell in one) for
//!   registration, routing, and handover scenarios
//! - [`mock_radio`] - Mock radio control channel with scriptable
//!   availability and recorded neighbor publications
//! - [`test_fixtures`] - Canned BTS configurations
//! - [`test_utils`] - Logging bootstrap and small helpers
//!
//! # Test Categories
//!
//! 1. **Registration Tests** - challenge/response auth, expiry policy,
//!    retry on a distinct core node
//! 2. **Routing Tests** - MO/MT calls and SMS, busy and offline handling
//! 3. **Handover Tests** - negotiation, holdoff, neighbor republication

pub mod mock_core;
pub mod mock_radio;
pub mod test_fixtures;
pub mod test_utils;

pub use mock_core::MockSipCore;
pub use mock_radio::MockRadio;
pub use test_fixtures::{handover_config, nnsf_config, simple_config};
pub use test_utils::init_test_logging;

#[cfg(test)]
mod registration_flow;

#[cfg(test)]
mod routing_flow;

#[cfg(test)]
mod handover_flow;
