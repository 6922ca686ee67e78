//! Handover Task
//!
//! The actor that drives the handover coordinator: handover negotiation
//! messages from the radio side, inbound requests from peers, and the
//! periodic neighbor poll. Radio availability changes are reported to the
//! app task.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::handover::HandoverCoordinator;
use crate::radio::RadioControl;
use crate::sip::SipTransport;
use crate::tasks::{
    AppMessage, BtsTaskBase, HandoverMessage, StatusType, StatusUpdate, Task, TaskMessage,
    NEIGHBOR_POLL_INTERVAL_SECS,
};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The handover task.
pub struct HandoverTask {
    base: BtsTaskBase,
    transport: Arc<dyn SipTransport>,
    radio: Arc<dyn RadioControl>,
    coordinator: Arc<Mutex<HandoverCoordinator>>,
    radio_up: Option<bool>,
}

impl HandoverTask {
    /// Creates the handover task over the shared coordinator, transport,
    /// and radio control channel.
    pub fn new(
        base: BtsTaskBase,
        transport: Arc<dyn SipTransport>,
        radio: Arc<dyn RadioControl>,
        coordinator: Arc<Mutex<HandoverCoordinator>>,
    ) -> Self {
        Self {
            base,
            transport,
            radio,
            coordinator,
            radio_up: None,
        }
    }

    async fn handle_message(&mut self, msg: HandoverMessage) {
        match msg {
            HandoverMessage::HandoverRequired {
                call_id,
                candidates,
                reply,
            } => {
                let mut coordinator = self.coordinator.lock().await;
                let accept = coordinator
                    .handover_required(&*self.transport, &call_id, &candidates, unix_now())
                    .await;
                let _ = reply.send(accept);
            }
            HandoverMessage::HandoverFailure { call_id, reason } => {
                let mut coordinator = self.coordinator.lock().await;
                coordinator.handover_failure(&call_id, &reason, unix_now());
            }
            HandoverMessage::InboundRequest { dialog, reply } => {
                let mut coordinator = self.coordinator.lock().await;
                let reference = coordinator.inbound_request(&*self.radio, dialog).await;
                let _ = reply.send(reference);
            }
            HandoverMessage::Neighbors { reply } => {
                let coordinator = self.coordinator.lock().await;
                let _ = reply.send(coordinator.neighbors().to_vec());
            }
        }
    }

    async fn poll(&mut self) {
        let available = self.radio.is_available().await;
        if self.radio_up != Some(available) {
            self.radio_up = Some(available);
            let _ = self
                .base
                .app_tx
                .send(AppMessage::StatusUpdate(StatusUpdate {
                    status_type: StatusType::RadioIsUp,
                    value: available,
                }))
                .await;
        }

        let mut coordinator = self.coordinator.lock().await;
        if coordinator
            .poll_tick(&*self.transport, &*self.radio)
            .await
        {
            debug!("neighbor list republished");
        }
    }
}

#[async_trait::async_trait]
impl Task for HandoverTask {
    type Message = HandoverMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<Self::Message>>) {
        let polling = self.base.config.handover.enable;
        info!(polling, "handover task started");

        let mut poll = tokio::time::interval(tokio::time::Duration::from_secs(
            NEIGHBOR_POLL_INTERVAL_SECS,
        ));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(TaskMessage::Message(msg)) => self.handle_message(msg).await,
                    Some(TaskMessage::Shutdown) | None => {
                        info!("handover task shutting down");
                        break;
                    }
                },
                _ = poll.tick(), if polling => self.poll().await,
            }
        }
    }
}
