//! Roaming Task
//!
//! The actor that owns the subscriber store, the registration engine, and
//! the router. Every registration, routing request, and CLI query for
//! subscriber state runs through this task's message loop, so handlers run
//! to completion and no two of them mutate the same subscriber
//! concurrently. A periodic tick drives the expiry sweep.
//!
//! The handover coordinator is shared with the handover task behind an
//! async mutex; each handler locks it for the duration of one dispatch.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use roamlink_common::types::IdentityToken;
use roamlink_common::Imsi;

use crate::handover::HandoverCoordinator;
use crate::roaming::engine::RegistrationEngine;
use crate::roaming::router::Router;
use crate::roaming::store::{SubscriberPersistence, SubscriberStore};
use crate::sip::SipTransport;
use crate::tasks::{BtsTaskBase, RoamingMessage, Task, TaskMessage, SWEEP_INTERVAL_SECS};

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The roaming task.
pub struct RoamingTask {
    transport: Arc<dyn SipTransport>,
    handover: Arc<Mutex<HandoverCoordinator>>,
    store: SubscriberStore,
    engine: RegistrationEngine,
    router: Router,
}

impl RoamingTask {
    /// Creates the roaming task over the shared transport, the shared
    /// handover coordinator, and a subscriber persistence backend.
    pub fn new(
        base: BtsTaskBase,
        transport: Arc<dyn SipTransport>,
        handover: Arc<Mutex<HandoverCoordinator>>,
        persistence: Box<dyn SubscriberPersistence>,
    ) -> Self {
        let config = base.config.clone();
        Self {
            transport,
            handover,
            store: SubscriberStore::new(persistence),
            engine: RegistrationEngine::new(config.clone()),
            router: Router::new(config),
        }
    }

    async fn handle_message(&mut self, msg: RoamingMessage) {
        let now = unix_now();
        match msg {
            RoamingMessage::Register { request, reply } => {
                let outcome = self
                    .engine
                    .register(&mut self.store, &*self.transport, request, now)
                    .await;
                if let Err(e) = &outcome {
                    debug!(reason = e.reason(), "registration failed");
                }
                let _ = reply.send(outcome);
            }
            RoamingMessage::Unregister { imsi } => {
                let subscriber = match self.store.find_by_imsi(&imsi) {
                    Some(sub) => sub.clone(),
                    None => {
                        debug!(%imsi, "unregister for unknown subscriber");
                        return;
                    }
                };
                let token = match subscriber.tmsi {
                    Some(tmsi) => IdentityToken::Tmsi(tmsi),
                    None => IdentityToken::Imsi(imsi.clone()),
                };
                if let Ok(node) = self.engine.selector().select_node(subscriber.tmsi) {
                    self.engine
                        .unregister(&*self.transport, &token, &node)
                        .await;
                }
                self.clear_outbound_handover(&imsi).await;
                self.store.forget(&imsi);
                self.router.call_ended(&imsi);
                info!(%imsi, "subscriber detached");
            }
            RoamingMessage::Route { request, reply } => {
                let mut handover = self.handover.lock().await;
                let verdict = self
                    .router
                    .route(&mut self.store, &mut handover, request, now);
                let _ = reply.send(verdict);
            }
            RoamingMessage::CallEnded { imsi } => {
                self.clear_outbound_handover(&imsi).await;
                self.router.call_ended(&imsi);
                self.store.update(&imsi, |sub| sub.call_id = None);
            }
            RoamingMessage::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            RoamingMessage::Nodes { reply } => {
                let nodes = self
                    .engine
                    .selector()
                    .nodes()
                    .iter()
                    .map(|(id, addr)| (*id, addr.clone()))
                    .collect();
                let _ = reply.send(nodes);
            }
            RoamingMessage::Forget { imsi, reply } => {
                let removed = match imsi {
                    Some(imsi) => usize::from(self.store.forget(&imsi)),
                    None => self.store.forget_all(),
                };
                info!(removed, "forgot subscribers");
                let _ = reply.send(removed);
            }
        }
    }

    /// Drops any outbound handover record tied to the subscriber's call, so
    /// a completed handover does not pin the record (and busy state)
    /// forever.
    async fn clear_outbound_handover(&mut self, imsi: &Imsi) {
        let call_id = self
            .router
            .live_call(imsi)
            .map(str::to_string)
            .or_else(|| {
                self.store
                    .find_by_imsi(imsi)
                    .and_then(|sub| sub.call_id.clone())
            });
        if let Some(call_id) = call_id {
            self.handover.lock().await.call_ended(&call_id);
        }
    }

    fn sweep(&mut self) {
        let expired = self.store.sweep_expired(unix_now());
        for imsi in &expired {
            self.router.call_ended(imsi);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale subscribers");
        }
    }
}

#[async_trait::async_trait]
impl Task for RoamingTask {
    type Message = RoamingMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<Self::Message>>) {
        info!(
            subscribers = self.store.len(),
            "roaming task started"
        );
        let mut sweep = tokio::time::interval(tokio::time::Duration::from_secs(
            SWEEP_INTERVAL_SECS,
        ));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(TaskMessage::Message(msg)) => self.handle_message(msg).await,
                    Some(TaskMessage::Shutdown) | None => {
                        info!("roaming task shutting down");
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep(),
            }
        }
    }
}
