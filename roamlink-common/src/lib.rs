//! roamlink-common - Shared types for the roamlink signaling bridge
//!
//! This crate provides the pieces shared between the BTS bridge and its
//! tests:
//!
//! - Subscriber identity newtypes (IMSI, TMSI, MSISDN)
//! - The domain error enum surfaced to the GSM side
//! - The sectioned BTS configuration model and its YAML loader
//! - Logging bootstrap built on `tracing`

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{BtsConfig, ConfigAlarm, ConfigError, NeighborSpec};
pub use error::RoamingError;
pub use types::{Imsi, Msisdn, Tmsi};
