//! Management CLI Command Handler
//!
//! Parses `roaming ...` command lines and renders fixed-column tables for
//! the answers. Anything that does not parse is unhandled: the caller gets
//! None and the surrounding management shell falls through to its other
//! command handlers.

use roamlink_common::Imsi;

use crate::handover::Neighbor;
use crate::roaming::Subscriber;

/// Parsed management commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BtsCliCommandType {
    /// `roaming neighbors` - show the neighbor table
    Neighbors,
    /// `roaming list` - show attached subscribers
    List,
    /// `roaming nodes` - show the NNSF node table
    Nodes,
    /// `roaming forget all` - drop every subscriber
    ForgetAll,
    /// `roaming forget <imsi>` - drop one subscriber
    Forget {
        /// Subscriber to drop
        imsi: Imsi,
    },
}

/// Parses a command line. Returns None for anything that is not a valid
/// `roaming` command; the command is then unhandled, not an error.
pub fn parse_cli_command(line: &str) -> Option<BtsCliCommandType> {
    let mut words = line.split_whitespace();
    if words.next()? != "roaming" {
        return None;
    }
    match words.next()? {
        "neighbors" => Some(BtsCliCommandType::Neighbors),
        "list" => Some(BtsCliCommandType::List),
        "nodes" => Some(BtsCliCommandType::Nodes),
        "forget" => match words.next()? {
            "all" => Some(BtsCliCommandType::ForgetAll),
            imsi => Imsi::new(imsi).map(|imsi| BtsCliCommandType::Forget { imsi }),
        },
        _ => None,
    }
}

/// Renders the neighbor table.
pub fn format_neighbors(neighbors: &[Neighbor], now: u64) -> String {
    let mut out = format!(
        "{:<24} {:>6} {:>5} {:>8} {:<8} {:<8}\n",
        "ADDRESS", "ARFCN", "BSIC", "CELL-ID", "ACTIVE", "HOLDOFF"
    );
    for n in neighbors {
        out.push_str(&format!(
            "{:<24} {:>6} {:>5} {:>8} {:<8} {:<8}\n",
            n.address,
            n.arfcn,
            n.bsic,
            n.cell_id,
            if n.active { "yes" } else { "no" },
            if n.in_holdoff(now) { "yes" } else { "-" },
        ));
    }
    out
}

/// Renders the subscriber table.
pub fn format_subscribers(subscribers: &[Subscriber]) -> String {
    let mut out = format!(
        "{:<16} {:<9} {:<16} {:<16} {:>12} {:<16}\n",
        "IMSI", "TMSI", "IMEI", "MSISDN", "EXPIRES", "CALL-ID"
    );
    for s in subscribers {
        out.push_str(&format!(
            "{:<16} {:<9} {:<16} {:<16} {:>12} {:<16}\n",
            s.imsi,
            s.tmsi.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            s.imei.as_deref().unwrap_or("-"),
            s.msisdn
                .as_ref()
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "-".into()),
            s.expires,
            s.call_id.as_deref().unwrap_or("-"),
        ));
    }
    out
}

/// Renders the NNSF node table.
pub fn format_nodes(nodes: &[(u8, String)]) -> String {
    let mut out = format!("{:<6} {:<24}\n", "NODE", "ADDRESS");
    for (id, addr) in nodes {
        out.push_str(&format!("{id:<6} {addr:<24}\n"));
    }
    out
}
