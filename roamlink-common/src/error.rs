//! Error types for roamlink

use thiserror::Error;

/// Domain failures surfaced to the GSM-side caller.
///
/// Transport-layer failures (timeouts, malformed headers) are translated
/// into one of these kinds before crossing the radio boundary; they never
/// leak raw transport errors upstream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoamingError {
    /// Neither IMSI nor TMSI was supplied for an operation that needs one.
    #[error("no subscriber identity supplied")]
    IdentityMissing,

    /// The registrar challenged with an algorithm other than AKAv1-MD5.
    #[error("unsupported authentication algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A 2xx response was missing required data (e.g. no MSISDN in the
    /// associated URI).
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The local re-registration interval is incompatible with the
    /// server-granted expiry; the subscriber is rejected from this area.
    #[error("location area not allowed")]
    LocationAreaNotAllowed,

    /// No core-network address could be resolved for a mobile-originated
    /// request.
    #[error("service unavailable")]
    ServiceUnavailable,

    /// The called party is not locally attached.
    #[error("subscriber offline")]
    Offline,

    /// A second terminating call reached a subscriber already in a call or
    /// mid-handover.
    #[error("subscriber busy")]
    Busy,

    /// Neither an NNSF node table nor a static registrar is configured.
    #[error("no registrar configured")]
    NoRegistrarConfigured,

    /// The transaction timed out after the bounded retry sequence.
    #[error("transaction timeout")]
    Timeout,

    /// Protocol-level failure in the SIP exchange.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Terminating SMS with a payload type the bridge does not carry.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
}

impl RoamingError {
    /// Failure reason string reported to the radio side.
    pub fn reason(&self) -> &'static str {
        match self {
            RoamingError::IdentityMissing => "identity-missing",
            RoamingError::UnsupportedAlgorithm(_) => "unsupported-algorithm",
            RoamingError::MalformedResponse(_) => "malformed-response",
            RoamingError::LocationAreaNotAllowed => "location-area-not-allowed",
            RoamingError::ServiceUnavailable => "service-unavailable",
            RoamingError::Offline => "offline",
            RoamingError::Busy => "busy",
            RoamingError::NoRegistrarConfigured => "no-registrar",
            RoamingError::Timeout => "timeout",
            RoamingError::ProtocolError(_) => "protocol-error",
            RoamingError::UnsupportedMedia(_) => "unsupported-media",
        }
    }
}
