//! Test utilities

use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::Mutex;

use roamlink_bts::{
    AppMessage, AppTask, BtsTaskBase, HandoverCoordinator, HandoverMessage, HandoverTask,
    MemoryPersistence, RoamingMessage, RoamingTask, SipTransport, Task, TaskHandle,
    DEFAULT_CHANNEL_CAPACITY,
};
use roamlink_common::config::BtsConfig;

use crate::mock_radio::MockRadio;

static INIT: Once = Once::new();

/// Initializes test logging once per process. Safe to call from every
/// test; later calls are no-ops.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Handles to a fully spawned bridge (all three tasks running).
pub struct BridgeHarness {
    pub roaming: TaskHandle<RoamingMessage>,
    pub handover: TaskHandle<HandoverMessage>,
    pub app: TaskHandle<AppMessage>,
}

/// Spawns the app, roaming, and handover tasks over the given mock core
/// and mock radio, sharing one handover coordinator like the binary does.
pub fn spawn_bridge(
    config: BtsConfig,
    core: impl SipTransport + 'static,
    radio: MockRadio,
) -> BridgeHarness {
    let (base, app_rx, roaming_rx, handover_rx) =
        BtsTaskBase::new(config, DEFAULT_CHANNEL_CAPACITY);
    let transport: Arc<dyn SipTransport> = Arc::new(core);
    let coordinator = Arc::new(Mutex::new(HandoverCoordinator::new(base.config.clone())));

    let harness = BridgeHarness {
        roaming: base.roaming_tx.clone(),
        handover: base.handover_tx.clone(),
        app: base.app_tx.clone(),
    };

    let mut roaming = RoamingTask::new(
        base.clone(),
        transport.clone(),
        coordinator.clone(),
        Box::new(MemoryPersistence::new()),
    );
    tokio::spawn(async move { roaming.run(roaming_rx).await });

    let mut handover = HandoverTask::new(base.clone(), transport, Arc::new(radio), coordinator);
    tokio::spawn(async move { handover.run(handover_rx).await });

    let mut app = AppTask::new(base);
    tokio::spawn(async move { app.run(app_rx).await });

    harness
}

/// Polls `condition` until it returns true or `timeout` elapses.
pub async fn wait_for_condition<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
