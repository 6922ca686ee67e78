//! UDP Signaling Channel
//!
//! Concrete [`SipTransport`] carrying typed requests as JSON datagrams.
//! The bridge deliberately does not speak wire-format SIP itself; the core
//! side of this channel is a gateway that owns the real SIP stack. Each
//! transaction binds an ephemeral socket, so concurrent transactions from
//! different tasks never race on a shared receive path.

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::sip::{SipRequest, SipResponse, SipTransport, TransportError};

/// Per-try wait for a final response.
pub const DEFAULT_TRANSACTION_WAIT_MS: u64 = 2000;

/// Retransmissions after the first send.
pub const DEFAULT_TRANSACTION_RETRIES: u32 = 3;

/// Largest datagram the channel accepts.
const MAX_DATAGRAM: usize = 16 * 1024;

#[derive(Serialize)]
struct WireRequest<'a> {
    tx_id: u64,
    request: &'a SipRequest,
}

#[derive(Deserialize)]
struct WireResponse {
    tx_id: u64,
    response: SipResponse,
}

/// JSON-over-UDP transaction channel to the signaling gateway.
pub struct UdpSignalingChannel {
    wait: Duration,
    retries: u32,
    next_tx_id: std::sync::atomic::AtomicU64,
}

impl UdpSignalingChannel {
    /// Creates a channel with the default retransmission budget.
    pub fn new() -> Self {
        Self::with_budget(
            Duration::from_millis(DEFAULT_TRANSACTION_WAIT_MS),
            DEFAULT_TRANSACTION_RETRIES,
        )
    }

    /// Creates a channel with an explicit per-try wait and retry count.
    pub fn with_budget(wait: Duration, retries: u32) -> Self {
        Self {
            wait,
            retries,
            next_tx_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    async fn try_once(
        &self,
        socket: &UdpSocket,
        target: &str,
        payload: &[u8],
        tx_id: u64,
    ) -> io::Result<Option<SipResponse>> {
        socket.send_to(payload, target).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match timeout(self.wait, socket.recv_from(&mut buf)).await {
                Ok(result) => result?,
                Err(_elapsed) => return Ok(None),
            };
            match serde_json::from_slice::<WireResponse>(&buf[..len]) {
                Ok(wire) if wire.tx_id == tx_id => return Ok(Some(wire.response)),
                Ok(wire) => {
                    debug!(got = wire.tx_id, want = tx_id, "stale transaction response");
                }
                Err(e) => {
                    warn!(%from, error = %e, "undecodable signaling datagram");
                }
            }
        }
    }
}

impl Default for UdpSignalingChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SipTransport for UdpSignalingChannel {
    async fn transaction(&self, request: SipRequest) -> Result<SipResponse, TransportError> {
        let tx_id = self
            .next_tx_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let payload = serde_json::to_vec(&WireRequest {
            tx_id,
            request: &request,
        })
        .map_err(|e| TransportError::Failed(e.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        for attempt in 0..=self.retries {
            match self
                .try_once(&socket, &request.target, &payload, tx_id)
                .await
            {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {
                    debug!(
                        method = %request.method,
                        target = %request.target,
                        attempt,
                        "transaction try timed out"
                    );
                }
                Err(e) => return Err(TransportError::Failed(e.to_string())),
            }
        }

        Err(TransportError::Timeout)
    }
}
