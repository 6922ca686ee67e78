//! Canned BTS configurations for integration tests

use roamlink_common::config::{load_bts_config_from_str, BtsConfig};

/// Single static registrar, no NNSF, no handover.
pub fn simple_config() -> BtsConfig {
    parse(
        r#"
identity:
  mcc: "001"
  mnc: "01"
  lac: 1000
  ci: 10
  bsic: { ncc: 0, bcc: 2 }
radio:
  band: 900
  c0: 75
roaming:
  reg_sip: "10.0.0.1:5060"
  my_sip: "192.168.1.2:5062"
"#,
    )
}

/// Two-node NNSF table, one selector bit, with T3212 enabled.
pub fn nnsf_config() -> BtsConfig {
    parse(
        r#"
identity:
  mcc: "001"
  mnc: "01"
  lac: 1000
  ci: 10
  bsic: { ncc: 0, bcc: 2 }
radio:
  band: 900
  c0: 75
timer:
  t3212: 1440
roaming:
  nodes_sip: '{"0": "10.1.0.1:5060", "1": "10.1.0.2:5060"}'
  nnsf_bits: 1
  my_sip: "192.168.1.2:5062"
"#,
    )
}

/// Handover enabled with two static neighbor peers.
pub fn handover_config() -> BtsConfig {
    parse(
        r#"
identity:
  mcc: "001"
  mnc: "01"
  lac: 1000
  ci: 10
  bsic: { ncc: 0, bcc: 2 }
radio:
  band: 900
  c0: 75
roaming:
  reg_sip: "10.0.0.1:5060"
  my_sip: "192.168.1.2:5062"
handover:
  enable: true
  neighbors: "10.0.0.2:5062, 10.0.0.3:5062"
  holdoff: 10
"#,
    )
}

fn parse(yaml: &str) -> BtsConfig {
    match load_bts_config_from_str(yaml) {
        Ok(config) => config,
        Err(e) => panic!("fixture config failed to parse: {e}"),
    }
}
