//! End-to-end session scenarios driven through the wire-frame handler
//! with an in-memory store and the mock chain gateway.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use trustoracle_core::chain::MockChainGateway;
use trustoracle_core::{canonical_digest, run_batch, ChainGateway, StepPayload, Store};

use trustoracle_gateway::config::GatewayConfig;
use trustoracle_gateway::connections::{next_session_seq, ConnectionMap};
use trustoracle_gateway::messages::Outbound;
use trustoracle_gateway::session::{Session, SessionDeps};

struct Harness {
    deps: SessionDeps,
    mock: Option<Arc<MockChainGateway>>,
}

impl Harness {
    fn local_only() -> Self {
        Self::build(false)
    }

    fn with_chain() -> Self {
        Self::build(true)
    }

    fn build(chain: bool) -> Self {
        let store = Store::in_memory().unwrap();
        let mock = chain.then(|| Arc::new(MockChainGateway::new()));
        let chain_gateway: Option<Arc<dyn ChainGateway>> = mock
            .clone()
            .map(|mock| mock as Arc<dyn ChainGateway>);
        let deps = SessionDeps {
            store,
            chain: chain_gateway,
            connections: ConnectionMap::new(),
            config: Arc::new(GatewayConfig::default()),
        };
        Self { deps, mock }
    }

    fn session(&self) -> TestSession {
        let (sender, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let session = Session::new(
            self.deps.clone(),
            "test:0".to_string(),
            sender,
            cancel.clone(),
            next_session_seq(),
        );
        TestSession {
            session,
            cancel,
            _rx: rx,
        }
    }

    fn store(&self) -> &Store {
        &self.deps.store
    }

    fn mock(&self) -> &MockChainGateway {
        self.mock.as_ref().expect("chain not configured")
    }
}

struct TestSession {
    session: Session,
    cancel: CancellationToken,
    _rx: mpsc::Receiver<Outbound>,
}

impl TestSession {
    async fn send(&mut self, frame: Value) -> Value {
        let response = self.session.handle_text(&frame.to_string()).await;
        serde_json::to_value(response).unwrap()
    }
}

struct TestDevice {
    id: String,
    key: SigningKey,
}

impl TestDevice {
    fn new(id: &str) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            id: id.to_string(),
            key: SigningKey::from_bytes(&secret),
        }
    }

    fn register_frame(&self) -> Value {
        json!({
            "type": "register",
            "deviceId": self.id,
            "publicKey": format!("0x{}", hex::encode(self.key.verifying_key().to_bytes())),
        })
    }

    fn authenticate_frame(&self) -> Value {
        json!({ "type": "authenticate", "deviceId": self.id })
    }

    fn signed_step_frame(&self, steps: u32, timestamp_ms: i64) -> Value {
        let payload = StepPayload {
            device_id: self.id.clone(),
            step_count: steps,
            timestamp: timestamp_ms as u64,
            firmware_version: 100,
            battery_percent: 85,
            raw_acc_samples: vec![[1.0, 2.0, 3.0]],
        };
        let signature = self.key.sign(&canonical_digest(&payload));
        json!({
            "type": "step_data",
            "deviceId": self.id,
            "stepCount": steps,
            "timestamp": timestamp_ms,
            "firmwareVersion": 100,
            "batteryPercent": 85,
            "rawAccSamples": [[1.0, 2.0, 3.0]],
            "signature": format!("0x{}", hex::encode(signature.to_bytes())),
        })
    }
}

async fn connect_device(harness: &Harness, device: &TestDevice) -> TestSession {
    let mut session = harness.session();
    let response = session.send(device.register_frame()).await;
    assert_eq!(response["success"], true, "register failed: {response}");
    let response = session.send(device.authenticate_frame()).await;
    assert_eq!(response["success"], true, "authenticate failed: {response}");
    session
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::test]
async fn s1_happy_path_registration_and_submission() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");
    let mut session = harness.session();

    let response = session.send(device.register_frame()).await;
    assert_eq!(response["type"], "register_response");
    assert_eq!(response["success"], true);

    let response = session.send(device.authenticate_frame()).await;
    assert_eq!(response["type"], "auth_response");
    assert_eq!(response["success"], true);

    let response = session
        .send(device.signed_step_frame(100, now_ms() - 60_000))
        .await;
    assert_eq!(response["type"], "step_data_response");
    assert_eq!(response["success"], true);
    assert_eq!(response["verified"], true);
    assert_eq!(response["stepCount"], 100);
    assert!(response["dataId"].is_i64());

    let pending = harness.store().list_pending(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].verified);
    assert!(!pending[0].submitted);
    assert_eq!(pending[0].step_count, 100);
}

#[tokio::test]
async fn s2_tampered_submission_is_rejected() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");
    let mut session = connect_device(&harness, &device).await;

    let mut frame = device.signed_step_frame(100, now_ms() - 60_000);
    frame["stepCount"] = json!(101);

    let response = session.send(frame).await;
    assert_eq!(response["success"], false);
    assert!(
        response["error"].as_str().unwrap().contains("signature"),
        "{response}"
    );
    assert_eq!(harness.store().count_submissions().unwrap(), 0);
}

#[tokio::test]
async fn s3_duplicate_submission_is_rejected() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");
    let mut session = connect_device(&harness, &device).await;

    let timestamp = now_ms() - 60_000;
    let response = session.send(device.signed_step_frame(100, timestamp)).await;
    assert_eq!(response["success"], true);

    let response = session.send(device.signed_step_frame(100, timestamp)).await;
    assert_eq!(response["success"], false);
    assert!(
        response["error"].as_str().unwrap().contains("duplicate"),
        "{response}"
    );
    assert_eq!(harness.store().count_submissions().unwrap(), 1);
}

#[tokio::test]
async fn s4_temporal_bounds_are_enforced() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");
    let mut session = connect_device(&harness, &device).await;

    let stale = now_ms() - 8 * 24 * 3_600 * 1_000;
    let response = session.send(device.signed_step_frame(100, stale)).await;
    assert_eq!(response["success"], false);
    assert!(
        response["error"].as_str().unwrap().contains("timestamp"),
        "{response}"
    );

    let future = now_ms() + 6 * 60_000;
    let response = session.send(device.signed_step_frame(100, future)).await;
    assert_eq!(response["success"], false);
    assert_eq!(harness.store().count_submissions().unwrap(), 0);
}

#[tokio::test]
async fn s5_batch_groups_per_device_in_receive_order() {
    let harness = Harness::with_chain();
    let d1 = TestDevice::new("d1");
    let d2 = TestDevice::new("d2");
    let mut s1 = connect_device(&harness, &d1).await;
    let mut s2 = connect_device(&harness, &d2).await;

    let t = now_ms() - 300_000;
    for (steps, offset) in [(50, 0), (75, 1_000), (25, 2_000)] {
        let response = s1.send(d1.signed_step_frame(steps, t + offset)).await;
        assert_eq!(response["success"], true, "{response}");
    }
    let response = s2.send(d2.signed_step_frame(200, t)).await;
    assert_eq!(response["success"], true);

    let summary = run_batch(
        harness.store(),
        harness.mock(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(summary.submitted_records, 4);
    assert!(summary.devices.iter().all(|d| d.success));

    let calls = harness.mock().recorded_submissions();
    assert_eq!(calls.len(), 2);
    let c1 = calls
        .iter()
        .find(|c| c.chain_device_id == "0xdev-d1")
        .unwrap();
    assert_eq!(c1.total_steps, 150);
    assert_eq!(c1.timestamps, vec![t, t + 1_000, t + 2_000]);
    assert_eq!(c1.signatures.len(), 3);
    let c2 = calls
        .iter()
        .find(|c| c.chain_device_id == "0xdev-d2")
        .unwrap();
    assert_eq!(c2.total_steps, 200);

    assert!(harness.store().list_pending(None).unwrap().is_empty());
    let device = harness.store().get_device("d1").unwrap().unwrap();
    assert_eq!(device.total_submissions, 1);
    let device = harness.store().get_device("d2").unwrap().unwrap();
    assert_eq!(device.total_submissions, 1);
}

#[tokio::test]
async fn s6_partial_batch_failure_is_isolated() {
    let harness = Harness::with_chain();
    let d1 = TestDevice::new("d1");
    let d2 = TestDevice::new("d2");
    let mut s1 = connect_device(&harness, &d1).await;
    let mut s2 = connect_device(&harness, &d2).await;

    let t = now_ms() - 300_000;
    s1.send(d1.signed_step_frame(150, t)).await;
    s2.send(d2.signed_step_frame(200, t)).await;
    harness.mock().fail_submissions_for("0xdev-d2");

    let summary = run_batch(
        harness.store(),
        harness.mock(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let o1 = summary.devices.iter().find(|d| d.device_id == "d1").unwrap();
    let o2 = summary.devices.iter().find(|d| d.device_id == "d2").unwrap();
    assert!(o1.success);
    assert!(o1.tx_digest.is_some());
    assert!(!o2.success);
    assert!(o2.error.is_some());

    let pending = harness.store().list_pending(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].device_id, "d2");
}

#[tokio::test]
async fn s7_failing_session_does_not_disturb_another() {
    let harness = Harness::local_only();
    let d1 = TestDevice::new("d1");
    let d2 = TestDevice::new("d2");
    let mut s1 = connect_device(&harness, &d1).await;
    let mut s2 = connect_device(&harness, &d2).await;

    let mut tampered = d1.signed_step_frame(100, now_ms() - 60_000);
    tampered["stepCount"] = json!(9_999);
    let response = s1.send(tampered).await;
    assert_eq!(response["success"], false);

    let response = s2.send(d2.signed_step_frame(42, now_ms() - 60_000)).await;
    assert_eq!(response["success"], true);

    let pending = harness.store().list_pending(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].device_id, "d2");
    assert_eq!(pending[0].step_count, 42);
}

#[tokio::test]
async fn state_machine_rejects_out_of_state_messages() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");
    let mut session = harness.session();

    // authenticate before register
    let response = session.send(device.authenticate_frame()).await;
    assert_eq!(response["type"], "error");
    assert!(response["error"].as_str().unwrap().contains("state"));

    // step_data before authenticate
    let response = session
        .send(device.signed_step_frame(10, now_ms()))
        .await;
    assert_eq!(response["type"], "error");

    // The session stays open and can still proceed normally.
    let response = session.send(device.register_frame()).await;
    assert_eq!(response["success"], true);
    let response = session.send(device.authenticate_frame()).await;
    assert_eq!(response["success"], true);
}

#[tokio::test]
async fn ping_is_answered_in_every_state() {
    let harness = Harness::local_only();
    let mut session = harness.session();
    let response = session.send(json!({ "type": "ping" })).await;
    assert_eq!(response["type"], "pong");
    assert!(response["timestamp"].is_i64());
}

#[tokio::test]
async fn malformed_and_unknown_frames_yield_validation_errors() {
    let harness = Harness::local_only();
    let mut session = harness.session();

    let response = session.send(json!({ "type": "selfDestruct" })).await;
    assert_eq!(response["type"], "error");

    let response = session.session.handle_text("not json at all").await;
    let response = serde_json::to_value(response).unwrap();
    assert_eq!(response["type"], "error");

    let response = session
        .send(json!({ "type": "register", "deviceId": "d1", "publicKey": "0xZZ" }))
        .await;
    assert_eq!(response["success"], false);
}

#[tokio::test]
async fn reregistration_with_different_key_is_rejected() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");
    let impostor = TestDevice::new("d1");
    let mut session = harness.session();

    let response = session.send(device.register_frame()).await;
    assert_eq!(response["success"], true);

    let response = session.send(impostor.register_frame()).await;
    assert_eq!(response["type"], "register_response");
    assert_eq!(response["success"], false);
    assert!(response["error"].as_str().unwrap().contains("public key"));
}

#[tokio::test]
async fn mismatched_device_id_is_rejected() {
    let harness = Harness::local_only();
    let d1 = TestDevice::new("d1");
    let other = TestDevice::new("other");
    let mut session = connect_device(&harness, &d1).await;

    // `other` is registered but this session is bound to d1.
    harness
        .store()
        .register_device("other", &other.key.verifying_key().to_bytes())
        .unwrap();
    let response = session
        .send(other.signed_step_frame(10, now_ms() - 1_000))
        .await;
    assert_eq!(response["success"], false);
    assert_eq!(harness.store().count_submissions().unwrap(), 0);
}

#[tokio::test]
async fn second_authentication_evicts_prior_session() {
    let harness = Harness::local_only();
    let device = TestDevice::new("d1");

    let first = connect_device(&harness, &device).await;
    assert!(!first.cancel.is_cancelled());

    let _second = connect_device(&harness, &device).await;
    assert!(first.cancel.is_cancelled());
}

#[tokio::test]
async fn chain_registration_assigns_handle_best_effort() {
    let harness = Harness::with_chain();
    let device = TestDevice::new("d1");
    let mut session = harness.session();

    let response = session.send(device.register_frame()).await;
    assert_eq!(response["success"], true);
    assert!(response["txDigest"].is_string());
    assert_eq!(response["chain"]["success"], true);

    let stored = harness.store().get_device("d1").unwrap().unwrap();
    assert_eq!(stored.chain_device_id.as_deref(), Some("0xdev-d1"));
    assert_eq!(harness.mock().registered_devices(), vec!["d1".to_string()]);
}

#[tokio::test]
async fn chain_outage_does_not_fail_registration() {
    let harness = Harness::with_chain();
    harness.mock().fail_everything();
    let device = TestDevice::new("d1");
    let mut session = harness.session();

    let response = session.send(device.register_frame()).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["chain"]["success"], false);

    let stored = harness.store().get_device("d1").unwrap().unwrap();
    assert!(stored.chain_device_id.is_none());
}

#[tokio::test]
async fn pet_flow_over_wire_frames() {
    let harness = Harness::with_chain();
    let device = TestDevice::new("d1");
    let mut session = connect_device(&harness, &device).await;

    let response = session
        .send(json!({ "type": "getPet", "deviceId": "d1" }))
        .await;
    assert_eq!(response["type"], "pet_data");
    assert_eq!(response["success"], true);
    assert_eq!(response["pet"]["device_id"], "d1");
    assert_eq!(response["pet"]["level"], 0);
    assert_eq!(response["pet"]["food"], 5);
    assert_eq!(response["pet"]["on_chain"], true);
    assert_eq!(response["pet"]["pet_object_id"], "0xpet-d1");

    let response = session
        .send(json!({ "type": "claimResources", "deviceId": "d1", "steps": 99 }))
        .await;
    assert_eq!(response["type"], "pet_error");
    assert_eq!(response["success"], false);

    let response = session
        .send(json!({ "type": "claimResources", "deviceId": "d1", "steps": 300 }))
        .await;
    assert_eq!(response["type"], "resources_claimed");
    assert_eq!(response["foodGained"], 3);
    assert_eq!(response["energyGained"], 4);

    let response = session
        .send(json!({ "type": "feedPet", "deviceId": "d1" }))
        .await;
    assert_eq!(response["type"], "pet_fed");
    assert_eq!(response["success"], true);
    assert_eq!(response["evolved"], false);

    let response = session
        .send(json!({ "type": "playWithPet", "deviceId": "d1" }))
        .await;
    assert_eq!(response["type"], "pet_played");
    assert_eq!(response["success"], true);

    let response = session
        .send(json!({
            "type": "updatePet",
            "deviceId": "d1",
            "happiness": 80,
            "hunger": 70,
        }))
        .await;
    assert_eq!(response["type"], "pet_updated");
    assert_eq!(response["success"], true);
    let pet = harness.store().find_pet("d1").unwrap().unwrap();
    assert_eq!(pet.happiness, 80);
    assert_eq!(pet.hunger, 70);
}
