//! Subscriber identity types
//!
//! IMSI, TMSI, and MSISDN newtypes used throughout the bridge. Routing
//! requests carry identities as prefixed tokens ("IMSI..." / "TMSI...");
//! the helpers here parse those tokens without panicking on garbage input.

use std::fmt;

use serde::{Deserialize, Serialize};

/// International Mobile Subscriber Identity: 6 to 15 decimal digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Imsi(String);

impl Imsi {
    /// Creates an IMSI from a digit string. Returns None when the string is
    /// not a plausible IMSI.
    pub fn new(digits: &str) -> Option<Self> {
        if digits.len() >= 6 && digits.len() <= 15 && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(digits.to_string()))
        } else {
            None
        }
    }

    /// Returns the digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Temporary Mobile Subscriber Identity: a 32-bit value, printed as 8 hex
/// digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tmsi(pub u32);

impl Tmsi {
    /// Parses a TMSI from its 8-hex-digit form.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 8 {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(Self)
    }

    /// Returns the raw 32-bit value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Tmsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Subscriber phone number in international form, with an optional leading
/// plus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Msisdn(String);

impl Msisdn {
    /// Creates an MSISDN from a number string.
    pub fn new(number: &str) -> Option<Self> {
        let digits = number.strip_prefix('+').unwrap_or(number);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(number.to_string()))
        } else {
            None
        }
    }

    /// Returns the number string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the number without a leading plus, for digit comparison.
    pub fn digits(&self) -> &str {
        self.0.strip_prefix('+').unwrap_or(&self.0)
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An identity token as it appears in routing requests and SIP usernames:
/// either "IMSI<digits>" or "TMSI<hex>".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityToken {
    /// Permanent identity
    Imsi(Imsi),
    /// Temporary identity
    Tmsi(Tmsi),
}

impl IdentityToken {
    /// Parses a prefixed identity token. Unknown prefixes yield None.
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(rest) = token.strip_prefix("IMSI") {
            return Imsi::new(rest).map(IdentityToken::Imsi);
        }
        if let Some(rest) = token.strip_prefix("TMSI") {
            return Tmsi::from_hex(rest).map(IdentityToken::Tmsi);
        }
        None
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityToken::Imsi(imsi) => write!(f, "IMSI{imsi}"),
            IdentityToken::Tmsi(tmsi) => write!(f, "TMSI{tmsi}"),
        }
    }
}
