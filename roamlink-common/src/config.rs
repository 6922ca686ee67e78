//! BTS Configuration Model
//!
//! The bridge consumes a structured configuration store with `identity`,
//! `radio`, `timer`, `roaming`, and `handover` sections. Configuration is
//! loaded from YAML; malformed or missing required fields raise operator
//! alarms but never crash the process — the bridge keeps running with the
//! values that did parse.
//!
//! # Example
//!
//! ```rust,ignore
//! use roamlink_common::config::{load_bts_config, validate_bts_config};
//!
//! let config = load_bts_config("config/bts.yaml")?;
//! for alarm in validate_bts_config(&config) {
//!     tracing::error!("config alarm: {}", alarm);
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum handover holdoff in seconds.
pub const HOLDOFF_MIN_SECS: u32 = 5;
/// Maximum handover holdoff in seconds.
pub const HOLDOFF_MAX_SECS: u32 = 60;
/// Default handover holdoff in seconds.
pub const HOLDOFF_DEFAULT_SECS: u32 = 10;

/// Errors that can occur while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// An operator-visible alarm raised by configuration validation.
///
/// Alarms indicate misconfiguration requiring intervention; they are logged
/// persistently rather than surfaced as per-request failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigAlarm {
    /// Configuration section the alarm concerns
    pub section: &'static str,
    /// Human-readable description
    pub message: String,
}

impl fmt::Display for ConfigAlarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.section, self.message)
    }
}

/// `identity` section: who this cell is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Mobile Country Code, 3 digits
    pub mcc: String,
    /// Mobile Network Code, 2-3 digits
    pub mnc: String,
    /// Location Area Code (16 bit)
    pub lac: u32,
    /// Cell Identity (16 bit)
    pub ci: u32,
    /// Base Station Identity Code
    pub bsic: BsicConfig,
}

/// BSIC: network colour code and base station colour code, 3 bits each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BsicConfig {
    /// Network Colour Code (0-7)
    pub ncc: u8,
    /// Base station Colour Code (0-7)
    pub bcc: u8,
}

/// `radio` section: band and beacon channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// GSM band: 850, 900, 1800, or 1900
    pub band: u16,
    /// Beacon ARFCN (C0)
    pub c0: u16,
}

/// `timer` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Periodic location-update interval T3212, in seconds. Zero disables
    /// periodic updates.
    #[serde(default)]
    pub t3212: u32,
}

/// `roaming` section: how to reach the SIP core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoamingConfig {
    /// Registration expiry requested from the core, in seconds
    #[serde(default = "default_expires")]
    pub expires: u32,
    /// Single static registrar, as ip:port
    #[serde(default)]
    pub reg_sip: Option<String>,
    /// NNSF node table: JSON map of node id to ip:port
    #[serde(default)]
    pub nodes_sip: Option<String>,
    /// Bit width used to hash a TMSI into a node selector (0 disables NNSF)
    #[serde(default)]
    pub nnsf_bits: u8,
    /// This BTS's own SIP address, as ip:port
    #[serde(default)]
    pub my_sip: Option<String>,
    /// Emergency-call SIP destination
    #[serde(default)]
    pub sos_sip: Option<String>,
    /// Location string attached to GSTN-bound calls
    #[serde(default)]
    pub gstn_location: Option<String>,
    /// Carry SMS as text/plain (true) or binary RPDU (false)
    #[serde(default)]
    pub text_sms: bool,
}

fn default_expires() -> u32 {
    3600
}

// A derived Default would zero `expires` and bypass the serde default, so
// an absent `roaming:` section must go through the same defaults the field
// attributes use.
impl Default for RoamingConfig {
    fn default() -> Self {
        Self {
            expires: default_expires(),
            reg_sip: None,
            nodes_sip: None,
            nnsf_bits: 0,
            my_sip: None,
            sos_sip: None,
            gstn_location: None,
            text_sms: false,
        }
    }
}

/// One entry from the `neighbors` list.
///
/// A bare SIP address is polled for its cell parameters. An entry of the
/// form `addr/arfcn:bsic:cell_id` pins the parameters statically and is
/// never polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSpec {
    /// Neighbor SIP address, ip:port
    pub address: String,
    /// Pinned cell parameters (ARFCN, BSIC, cell id), if provisioned
    pub cell: Option<(u16, u8, u32)>,
}

impl NeighborSpec {
    fn parse(entry: &str) -> Option<Self> {
        let Some((address, params)) = entry.split_once('/') else {
            return Some(Self {
                address: entry.to_string(),
                cell: None,
            });
        };
        let mut parts = params.split(':');
        let arfcn = parts.next()?.parse().ok()?;
        let bsic = parts.next()?.parse().ok()?;
        let cell_id = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            address: address.trim().to_string(),
            cell: Some((arfcn, bsic, cell_id)),
        })
    }
}

/// `handover` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverConfig {
    /// Whether handover is enabled at all
    #[serde(default)]
    pub enable: bool,
    /// Comma-separated neighbor list; entries are a SIP address with an
    /// optional `/arfcn:bsic:cell_id` static suffix
    #[serde(default)]
    pub neighbors: Option<String>,
    /// Reason string attached to outbound handover requests
    #[serde(default)]
    pub reason: Option<String>,
    /// Holdoff after a failed handover target, in seconds (clamped 5-60)
    #[serde(default = "default_holdoff")]
    pub holdoff: u32,
}

fn default_holdoff() -> u32 {
    HOLDOFF_DEFAULT_SECS
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            enable: false,
            neighbors: None,
            reason: None,
            holdoff: HOLDOFF_DEFAULT_SECS,
        }
    }
}

/// Complete BTS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtsConfig {
    /// Cell identity section
    pub identity: IdentityConfig,
    /// Radio section
    pub radio: RadioConfig,
    /// Timer section
    #[serde(default = "default_timer")]
    pub timer: TimerConfig,
    /// Roaming section
    #[serde(default)]
    pub roaming: RoamingConfig,
    /// Handover section
    #[serde(default)]
    pub handover: HandoverConfig,
}

fn default_timer() -> TimerConfig {
    TimerConfig { t3212: 0 }
}

impl BtsConfig {
    /// Parses the `nodes_sip` JSON map into node id -> address entries.
    ///
    /// A malformed map yields an empty table (the caller raises the alarm
    /// via `validate_bts_config`).
    pub fn nnsf_nodes(&self) -> BTreeMap<u8, String> {
        match &self.roaming.nodes_sip {
            Some(json) => serde_json::from_str::<BTreeMap<String, String>>(json)
                .map(|m| {
                    m.into_iter()
                        .filter_map(|(k, v)| k.parse::<u8>().ok().map(|id| (id, v)))
                        .collect()
                })
                .unwrap_or_default(),
            None => BTreeMap::new(),
        }
    }

    /// Handover holdoff with the 5-60s clamp applied.
    pub fn holdoff_secs(&self) -> u32 {
        self.handover
            .holdoff
            .clamp(HOLDOFF_MIN_SECS, HOLDOFF_MAX_SECS)
    }

    /// Neighbor entries from the comma list, trimmed and de-blanked.
    /// Entries with a malformed static suffix are dropped (validation
    /// raises the alarm).
    pub fn neighbor_specs(&self) -> Vec<NeighborSpec> {
        self.handover
            .neighbors
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(NeighborSpec::parse)
            .collect()
    }

    /// Neighbor SIP addresses only.
    pub fn neighbor_addresses(&self) -> Vec<String> {
        self.neighbor_specs()
            .into_iter()
            .map(|spec| spec.address)
            .collect()
    }
}

/// Loads a BTS configuration from a YAML file.
pub fn load_bts_config<P: AsRef<Path>>(path: P) -> Result<BtsConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    load_bts_config_from_str(&contents)
}

/// Loads a BTS configuration from a YAML string.
pub fn load_bts_config_from_str(yaml: &str) -> Result<BtsConfig, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Validates a BTS configuration, returning the list of operator alarms.
///
/// An empty list means the configuration is clean. Alarms do not prevent
/// the bridge from starting; they are logged and left standing until the
/// operator intervenes.
pub fn validate_bts_config(config: &BtsConfig) -> Vec<ConfigAlarm> {
    let mut alarms = Vec::new();
    let mut alarm = |section: &'static str, message: String| {
        alarms.push(ConfigAlarm { section, message });
    };

    // Identity
    let id = &config.identity;
    if id.mcc.len() != 3 || !id.mcc.bytes().all(|b| b.is_ascii_digit()) {
        alarm("identity", format!("MCC '{}' must be 3 digits", id.mcc));
    }
    if !(id.mnc.len() == 2 || id.mnc.len() == 3) || !id.mnc.bytes().all(|b| b.is_ascii_digit()) {
        alarm("identity", format!("MNC '{}' must be 2-3 digits", id.mnc));
    }
    if id.lac > 0xFFFF {
        alarm("identity", format!("LAC {} exceeds 16 bits", id.lac));
    }
    if id.ci > 0xFFFF {
        alarm("identity", format!("CI {} exceeds 16 bits", id.ci));
    }
    if id.bsic.ncc > 7 {
        alarm("identity", format!("BSIC NCC {} exceeds 3 bits", id.bsic.ncc));
    }
    if id.bsic.bcc > 7 {
        alarm("identity", format!("BSIC BCC {} exceeds 3 bits", id.bsic.bcc));
    }

    // Radio
    let arfcn_valid = match config.radio.band {
        850 => (128..=251).contains(&config.radio.c0),
        900 => config.radio.c0 <= 124 || (975..=1023).contains(&config.radio.c0),
        1800 => (512..=885).contains(&config.radio.c0),
        1900 => (512..=810).contains(&config.radio.c0),
        other => {
            alarm(
                "radio",
                format!("band {other} is not one of 850/900/1800/1900"),
            );
            true // band alarm already raised; skip the ARFCN check
        }
    };
    if !arfcn_valid {
        alarm(
            "radio",
            format!(
                "C0 ARFCN {} is outside band {}",
                config.radio.c0, config.radio.band
            ),
        );
    }

    // Roaming
    let roaming = &config.roaming;
    let nodes = config.nnsf_nodes();
    if roaming.nodes_sip.is_some() && nodes.is_empty() {
        alarm("roaming", "nodes_sip is not a valid JSON node map".into());
    }
    if roaming.reg_sip.is_none() && nodes.is_empty() {
        alarm(
            "roaming",
            "neither reg_sip nor nodes_sip configured; registration will fail".into(),
        );
    }
    if roaming.nnsf_bits > 8 {
        alarm(
            "roaming",
            format!("nnsf_bits {} exceeds 8", roaming.nnsf_bits),
        );
    }
    if roaming.my_sip.is_none() {
        alarm("roaming", "my_sip missing; contact address unknown".into());
    }
    if roaming.expires == 0 {
        alarm("roaming", "expires must be non-zero".into());
    }

    // Handover
    if config.handover.enable {
        let entries: Vec<&str> = config
            .handover
            .neighbors
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if entries.is_empty() {
            alarm("handover", "handover enabled with no neighbors".into());
        }
        for entry in entries {
            if NeighborSpec::parse(entry).is_none() {
                alarm(
                    "handover",
                    format!("neighbor entry '{entry}' has a malformed static suffix"),
                );
            }
        }
        if config.handover.holdoff < HOLDOFF_MIN_SECS
            || config.handover.holdoff > HOLDOFF_MAX_SECS
        {
            alarm(
                "handover",
                format!(
                    "holdoff {} outside {}-{}s, clamped",
                    config.handover.holdoff, HOLDOFF_MIN_SECS, HOLDOFF_MAX_SECS
                ),
            );
        }
    }

    alarms
}

/// Loads a configuration and logs validation alarms in one step.
pub fn load_and_validate_bts_config<P: AsRef<Path>>(path: P) -> Result<BtsConfig, ConfigError> {
    let config = load_bts_config(path)?;
    for alarm in validate_bts_config(&config) {
        tracing::error!(section = alarm.section, "config alarm: {}", alarm.message);
    }
    Ok(config)
}
