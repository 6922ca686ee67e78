//! Routing integration tests
//!
//! Mobile-originated and mobile-terminated calls, SMS payload handling,
//! busy detection, and USSD, all driven through the roaming task.

use tokio::sync::oneshot;

use roamlink_bts::{
    IdentityRef, RegisterOutcome, RegisterRequest, RoamingMessage, RouteKind, RouteRequest,
    RouteVerdict, SMS_BINARY_TYPE, SMS_TEXT_TYPE,
};
use roamlink_common::{Imsi, RoamingError};

use crate::mock_core::MockSipCore;
use crate::mock_radio::MockRadio;
use crate::test_fixtures::simple_config;
use crate::test_utils::{init_test_logging, spawn_bridge, BridgeHarness};

const IMSI: &str = "001010123456789";
const TOKEN: &str = "IMSI001010123456789";
const MSISDN: &str = "+15551234567";

/// Provisions and registers the test subscriber.
async fn attach(harness: &BridgeHarness, core: &MockSipCore) {
    core.provision(TOKEN, MSISDN, Some("TMSI4f1a2b3c"));
    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Register {
            request: RegisterRequest {
                imsi: Imsi::new(IMSI),
                ..Default::default()
            },
            reply,
        })
        .await
        .unwrap();
    match reply_rx.await.unwrap().unwrap() {
        RegisterOutcome::Registered { .. } => {}
        other => panic!("attach failed: {other:?}"),
    }
}

async fn route(
    harness: &BridgeHarness,
    request: RouteRequest,
) -> Result<RouteVerdict, RoamingError> {
    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Route { request, reply })
        .await
        .unwrap();
    reply_rx.await.unwrap()
}

fn mo_call(called: &str, call_id: &str) -> RouteRequest {
    RouteRequest {
        identity: IdentityRef {
            imsi: Imsi::new(IMSI),
            tmsi: None,
        },
        called: called.to_string(),
        call_id: Some(call_id.to_string()),
        kind: RouteKind::Call { emergency: false },
    }
}

fn mt_call(called: &str, call_id: &str) -> RouteRequest {
    RouteRequest {
        identity: IdentityRef::default(),
        called: called.to_string(),
        call_id: Some(call_id.to_string()),
        kind: RouteKind::Call { emergency: false },
    }
}

#[tokio::test]
async fn test_mo_call_routes_to_core() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());
    attach(&harness, &core).await;

    match route(&harness, mo_call("+15559998888", "call-1")).await.unwrap() {
        RouteVerdict::MobileOriginated { destination, .. } => {
            assert!(destination.starts_with("sip:+15559998888@10.0.0.1:5060"));
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
}

#[tokio::test]
async fn test_mt_call_delivers_locally() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());
    attach(&harness, &core).await;

    match route(&harness, mt_call(MSISDN, "call-1")).await.unwrap() {
        RouteVerdict::MobileTerminated { imsi, delivery, .. } => {
            assert_eq!(imsi.as_str(), IMSI);
            // Delivery prefers the temporary identity at our own contact.
            assert_eq!(delivery, "sip:TMSI4f1a2b3c@192.168.1.2:5062");
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
}

#[tokio::test]
async fn test_second_call_to_engaged_subscriber_is_busy() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());
    attach(&harness, &core).await;

    // The subscriber originates a call, then someone calls them.
    route(&harness, mo_call("+15559998888", "call-1")).await.unwrap();
    assert_eq!(
        route(&harness, mt_call(MSISDN, "call-2")).await,
        Err(RoamingError::Busy)
    );

    // Once the call ends they are reachable again.
    harness
        .roaming
        .send(RoamingMessage::CallEnded {
            imsi: Imsi::new(IMSI).unwrap(),
        })
        .await
        .unwrap();
    assert!(route(&harness, mt_call(MSISDN, "call-3")).await.is_ok());
}

#[tokio::test]
async fn test_mt_sms_unknown_payload_rejected() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());
    attach(&harness, &core).await;

    let result = route(
        &harness,
        RouteRequest {
            identity: IdentityRef::default(),
            called: MSISDN.to_string(),
            call_id: None,
            kind: RouteKind::Sms {
                content_type: "application/x-unknown".to_string(),
            },
        },
    )
    .await;
    assert!(matches!(result, Err(RoamingError::UnsupportedMedia(_))));
}

#[tokio::test]
async fn test_mt_sms_reencoded_per_config() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());
    attach(&harness, &core).await;

    match route(
        &harness,
        RouteRequest {
            identity: IdentityRef::default(),
            called: MSISDN.to_string(),
            call_id: None,
            kind: RouteKind::Sms {
                content_type: SMS_TEXT_TYPE.to_string(),
            },
        },
    )
    .await
    .unwrap()
    {
        RouteVerdict::MobileTerminated { content_type, .. } => {
            // text_sms is off in this config, so delivery re-encodes the
            // accepted text payload as binary RPDU.
            assert_eq!(content_type.as_deref(), Some(SMS_BINARY_TYPE));
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
}

#[tokio::test]
async fn test_call_to_unknown_party_is_offline() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core, MockRadio::new());

    assert_eq!(
        route(&harness, mt_call("+15550000000", "call-1")).await,
        Err(RoamingError::Offline)
    );
}

#[tokio::test]
async fn test_ussd_routes_as_mobile_originated() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());
    attach(&harness, &core).await;

    match route(
        &harness,
        RouteRequest {
            identity: IdentityRef {
                imsi: Imsi::new(IMSI),
                tmsi: None,
            },
            called: "*100#".to_string(),
            call_id: None,
            kind: RouteKind::Ussd,
        },
    )
    .await
    .unwrap()
    {
        RouteVerdict::MobileOriginated { destination, .. } => {
            assert_eq!(destination, "sip:*100#@10.0.0.1:5060");
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
}
