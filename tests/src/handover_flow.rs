//! Handover integration tests
//!
//! Negotiation with peer cells, holdoff after failures, inbound handover
//! continuation through the router, and neighbor polling.

use std::time::Duration;

use tokio::sync::oneshot;

use roamlink_bts::sip::SipMethod;
use roamlink_bts::{
    HandoverMessage, IdentityRef, InboundDialog, RoamingMessage, RouteKind, RouteRequest,
    RouteVerdict,
};

use crate::mock_core::{CellParams, MockSipCore};
use crate::mock_radio::MockRadio;
use crate::test_fixtures::handover_config;
use crate::test_utils::{init_test_logging, spawn_bridge, BridgeHarness};

const PEER_A: &str = "10.0.0.2:5062";
const PEER_B: &str = "10.0.0.3:5062";

async fn handover_required(
    harness: &BridgeHarness,
    call_id: &str,
    candidates: &[&str],
) -> Option<roamlink_bts::HandoverAccept> {
    let (reply, reply_rx) = oneshot::channel();
    harness
        .handover
        .send(HandoverMessage::HandoverRequired {
            call_id: call_id.to_string(),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
            reply,
        })
        .await
        .unwrap();
    reply_rx.await.unwrap()
}

fn dialog(call_id: &str) -> InboundDialog {
    InboundDialog {
        call_id: call_id.to_string(),
        caller_uri: "sip:+15551234567@10.0.0.1".to_string(),
        callee_uri: "sip:+15559998888@10.0.0.1".to_string(),
        cseq: 42,
        peer: PEER_A.to_string(),
    }
}

#[tokio::test]
async fn test_negotiation_takes_first_acceptance() {
    init_test_logging();
    let core = MockSipCore::new();
    core.accept_handover(PEER_B, 9);
    let harness = spawn_bridge(handover_config(), core.clone(), MockRadio::new());

    let accept = handover_required(&harness, "call-1", &[PEER_A, PEER_B])
        .await
        .unwrap();
    assert_eq!(accept.target, PEER_B);
    assert_eq!(accept.reference, Some(9));

    // Both peers were asked, in candidate order.
    let infos = core.requests_of(SipMethod::Info);
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].target, PEER_A);
    assert_eq!(infos[1].target, PEER_B);
}

#[tokio::test]
async fn test_failed_target_goes_into_holdoff() {
    init_test_logging();
    let core = MockSipCore::new();
    core.accept_handover(PEER_A, 1);
    let harness = spawn_bridge(handover_config(), core.clone(), MockRadio::new());

    handover_required(&harness, "call-1", &[PEER_A]).await.unwrap();
    harness
        .handover
        .send(HandoverMessage::HandoverFailure {
            call_id: "call-1".to_string(),
            reason: "link-lost".to_string(),
        })
        .await
        .unwrap();

    // While held off, the peer is skipped without being contacted.
    assert!(handover_required(&harness, "call-2", &[PEER_A]).await.is_none());
    assert_eq!(core.requests_of(SipMethod::Info).len(), 1);
}

#[tokio::test]
async fn test_inbound_handover_continuation() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(handover_config(), core, MockRadio::new());

    let (reply, reply_rx) = oneshot::channel();
    harness
        .handover
        .send(HandoverMessage::InboundRequest {
            dialog: dialog("call-9"),
            reply,
        })
        .await
        .unwrap();
    let reference = reply_rx.await.unwrap().unwrap();

    // The continuation is routed through the roaming task and consumes
    // the record.
    let continuation = RouteRequest {
        identity: IdentityRef::default(),
        called: String::new(),
        call_id: None,
        kind: RouteKind::HandoverContinuation { reference },
    };
    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Route {
            request: continuation.clone(),
            reply,
        })
        .await
        .unwrap();
    match reply_rx.await.unwrap().unwrap() {
        RouteVerdict::HandoverContinuation(inbound) => {
            assert_eq!(inbound.call_id, "call-9");
            assert_eq!(inbound.cseq, 42);
            assert_eq!(inbound.peer, PEER_A);
        }
        other => panic!("unexpected verdict: {other:?}"),
    }

    // A reference resolves at most once.
    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Route {
            request: continuation,
            reply,
        })
        .await
        .unwrap();
    assert!(reply_rx.await.unwrap().is_err());
}

#[tokio::test]
async fn test_inbound_denied_without_radio_resource() {
    init_test_logging();
    let core = MockSipCore::new();
    let radio = MockRadio::new();
    radio.set_grant_channels(false);
    let harness = spawn_bridge(handover_config(), core, radio);

    let (reply, reply_rx) = oneshot::channel();
    harness
        .handover
        .send(HandoverMessage::InboundRequest {
            dialog: dialog("call-9"),
            reply,
        })
        .await
        .unwrap();
    assert!(reply_rx.await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_neighbor_poll_discovers_and_publishes() {
    init_test_logging();
    let core = MockSipCore::new();
    core.set_cell(
        PEER_A,
        CellParams {
            arfcn: 75,
            bsic: 18,
            cell_id: 1010,
        },
    );
    core.set_cell(
        PEER_B,
        CellParams {
            arfcn: 80,
            bsic: 19,
            cell_id: 1011,
        },
    );
    let radio = MockRadio::new();
    let harness = spawn_bridge(handover_config(), core, radio.clone());

    // Let a few poll ticks elapse (virtual time).
    tokio::time::sleep(Duration::from_secs(25)).await;

    let publications = radio.publications();
    assert!(!publications.is_empty());
    let last = publications.last().unwrap();
    assert_eq!(last.len(), 2);
    // Sorted by ARFCN.
    assert_eq!(last[0].arfcn, 75);
    assert_eq!(last[1].arfcn, 80);

    // The CLI sees the discovered neighbors too.
    let (reply, reply_rx) = oneshot::channel();
    harness
        .handover
        .send(HandoverMessage::Neighbors { reply })
        .await
        .unwrap();
    let neighbors = reply_rx.await.unwrap();
    assert!(neighbors.iter().all(|n| n.active));
}
