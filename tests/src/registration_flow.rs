//! Registration integration tests
//!
//! Drives the roaming task end to end against the mock core: digest
//! challenge/response, single-use nonces, expiry policy, deregistration,
//! and timeout handling.

use tokio::sync::oneshot;

use roamlink_bts::sip::SipMethod;
use roamlink_bts::{AuthCredentials, RegisterOutcome, RegisterRequest, RoamingMessage};
use roamlink_common::{Imsi, RoamingError};

use crate::mock_core::MockSipCore;
use crate::mock_radio::MockRadio;
use crate::test_fixtures::{nnsf_config, simple_config};
use crate::test_utils::{init_test_logging, spawn_bridge, BridgeHarness};

const IMSI: &str = "001010123456789";
const TOKEN: &str = "IMSI001010123456789";

async fn register(
    harness: &BridgeHarness,
    request: RegisterRequest,
) -> Result<RegisterOutcome, RoamingError> {
    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Register { request, reply })
        .await
        .unwrap();
    reply_rx.await.unwrap()
}

fn imsi_request() -> RegisterRequest {
    RegisterRequest {
        imsi: Imsi::new(IMSI),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_challenge_response_registration() {
    init_test_logging();
    let core = MockSipCore::new();
    core.require_auth(true);
    core.provision(TOKEN, "+15551234567", Some("TMSI4f1a2b3c"));
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());

    // First attempt is challenged.
    let outcome = register(&harness, imsi_request()).await.unwrap();
    let nonce = match outcome {
        RegisterOutcome::ChallengeIssued { nonce, realm } => {
            assert_eq!(realm, "core.test");
            nonce
        }
        other => panic!("expected challenge, got {other:?}"),
    };

    // Retry with credentials succeeds and carries the issued nonce.
    let outcome = register(
        &harness,
        RegisterRequest {
            credentials: Some(AuthCredentials {
                response: "aabbccdd".to_string(),
            }),
            ..imsi_request()
        },
    )
    .await
    .unwrap();
    match outcome {
        RegisterOutcome::Registered { imsi, tmsi, msisdn, .. } => {
            assert_eq!(imsi.as_str(), IMSI);
            assert_eq!(tmsi.unwrap().value(), 0x4f1a2b3c);
            assert_eq!(msisdn.as_str(), "+15551234567");
        }
        other => panic!("expected success, got {other:?}"),
    }

    let registers = core.requests_of(SipMethod::Register);
    assert_eq!(registers.len(), 2);
    assert!(registers[0].get_header("Authorization").is_none());
    let auth = registers[1].get_header("Authorization").unwrap();
    assert!(auth.contains(&format!(r#"nonce="{nonce}""#)));
    assert!(auth.contains("AKAv1-MD5"));
}

#[tokio::test]
async fn test_consumed_challenge_cannot_be_reused() {
    init_test_logging();
    let core = MockSipCore::new();
    core.require_auth(true);
    core.provision(TOKEN, "+15551234567", None);
    let harness = spawn_bridge(simple_config(), core, MockRadio::new());

    register(&harness, imsi_request()).await.unwrap();
    let credentials = RegisterRequest {
        credentials: Some(AuthCredentials {
            response: "aabbccdd".to_string(),
        }),
        ..imsi_request()
    };
    register(&harness, credentials.clone()).await.unwrap();

    // The nonce was consumed by the successful retry.
    let result = register(&harness, credentials).await;
    assert!(matches!(result, Err(RoamingError::ProtocolError(_))));
}

#[tokio::test]
async fn test_unknown_subscriber_rejected() {
    init_test_logging();
    let core = MockSipCore::new();
    let harness = spawn_bridge(simple_config(), core, MockRadio::new());

    let result = register(&harness, imsi_request()).await;
    assert!(matches!(result, Err(RoamingError::ProtocolError(_))));
}

#[tokio::test]
async fn test_registrar_timeout_surfaces() {
    init_test_logging();
    let core = MockSipCore::new();
    core.provision(TOKEN, "+15551234567", None);
    // Single static registrar: no alternate node to retry on.
    core.fail_target("10.0.0.1:5060");
    let harness = spawn_bridge(simple_config(), core, MockRadio::new());

    assert_eq!(register(&harness, imsi_request()).await, Err(RoamingError::Timeout));
}

#[tokio::test]
async fn test_short_grant_triggers_policy_deregistration() {
    init_test_logging();
    // T3212 of 1440s demands a granted expiry of at least 2880s.
    let core = MockSipCore::new();
    core.provision(TOKEN, "+15551234567", None);
    core.set_granted_expires(2000);
    let harness = spawn_bridge(nnsf_config(), core.clone(), MockRadio::new());

    let result = register(&harness, imsi_request()).await;
    assert_eq!(result, Err(RoamingError::LocationAreaNotAllowed));

    // The violation is answered with an immediate deregistration.
    let registers = core.requests_of(SipMethod::Register);
    assert_eq!(registers.len(), 2);
    assert_eq!(registers[1].get_header("Expires"), Some("0"));

    // And the store stays empty.
    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Snapshot { reply })
        .await
        .unwrap();
    assert!(reply_rx.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregister_detaches_and_deregisters() {
    init_test_logging();
    let core = MockSipCore::new();
    core.provision(TOKEN, "+15551234567", None);
    let harness = spawn_bridge(simple_config(), core.clone(), MockRadio::new());

    register(&harness, imsi_request()).await.unwrap();
    harness
        .roaming
        .send(RoamingMessage::Unregister {
            imsi: Imsi::new(IMSI).unwrap(),
        })
        .await
        .unwrap();

    let (reply, reply_rx) = oneshot::channel();
    harness
        .roaming
        .send(RoamingMessage::Snapshot { reply })
        .await
        .unwrap();
    assert!(reply_rx.await.unwrap().is_empty());

    let registers = core.requests_of(SipMethod::Register);
    assert_eq!(registers.last().unwrap().get_header("Expires"), Some("0"));
}
