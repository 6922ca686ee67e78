//! Application Task
//!
//! Answers management CLI commands by querying the roaming and handover
//! tasks, and tracks status updates from the other tasks.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use roamlink_common::Imsi;

use crate::app::cmd_handler::{
    format_neighbors, format_nodes, format_subscribers, parse_cli_command, BtsCliCommandType,
};
use crate::tasks::{
    AppMessage, BtsTaskBase, HandoverMessage, RoamingMessage, StatusType, StatusUpdate, Task,
    TaskMessage,
};

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The application task.
pub struct AppTask {
    task_base: BtsTaskBase,
    radio_up: bool,
}

impl AppTask {
    /// Creates the app task.
    pub fn new(task_base: BtsTaskBase) -> Self {
        Self {
            task_base,
            radio_up: false,
        }
    }

    fn handle_status_update(&mut self, update: StatusUpdate) {
        match update.status_type {
            StatusType::RadioIsUp => {
                if self.radio_up != update.value {
                    info!(up = update.value, "radio availability changed");
                }
                self.radio_up = update.value;
            }
        }
    }

    /// Executes one management command. None means unhandled.
    async fn handle_cli_line(&self, line: &str) -> Option<String> {
        let command = parse_cli_command(line)?;
        debug!(?command, "management command");

        match command {
            BtsCliCommandType::Neighbors => {
                let (reply, reply_rx) = oneshot::channel();
                self.task_base
                    .handover_tx
                    .send(HandoverMessage::Neighbors { reply })
                    .await
                    .ok()?;
                let neighbors = reply_rx.await.ok()?;
                Some(format_neighbors(&neighbors, unix_now()))
            }
            BtsCliCommandType::List => {
                let (reply, reply_rx) = oneshot::channel();
                self.task_base
                    .roaming_tx
                    .send(RoamingMessage::Snapshot { reply })
                    .await
                    .ok()?;
                let subscribers = reply_rx.await.ok()?;
                Some(format_subscribers(&subscribers))
            }
            BtsCliCommandType::Nodes => {
                let (reply, reply_rx) = oneshot::channel();
                self.task_base
                    .roaming_tx
                    .send(RoamingMessage::Nodes { reply })
                    .await
                    .ok()?;
                let nodes = reply_rx.await.ok()?;
                Some(format_nodes(&nodes))
            }
            BtsCliCommandType::ForgetAll => self.forget(None).await,
            BtsCliCommandType::Forget { imsi } => self.forget(Some(imsi)).await,
        }
    }

    async fn forget(&self, imsi: Option<Imsi>) -> Option<String> {
        let (reply, reply_rx) = oneshot::channel();
        self.task_base
            .roaming_tx
            .send(RoamingMessage::Forget { imsi, reply })
            .await
            .ok()?;
        let removed = reply_rx.await.ok()?;
        Some(format!("forgot {removed} subscriber(s)\n"))
    }
}

#[async_trait::async_trait]
impl Task for AppTask {
    type Message = AppMessage;

    async fn run(&mut self, mut rx: mpsc::Receiver<TaskMessage<Self::Message>>) {
        info!("app task started");
        while let Some(msg) = rx.recv().await {
            match msg {
                TaskMessage::Message(AppMessage::StatusUpdate(update)) => {
                    self.handle_status_update(update);
                }
                TaskMessage::Message(AppMessage::CliCommand(cmd)) => {
                    let response = self.handle_cli_line(&cmd.line).await;
                    if response.is_none() {
                        warn!(line = %cmd.line, "unhandled management command");
                    }
                    let _ = cmd.reply.send(response);
                }
                TaskMessage::Shutdown => {
                    info!("app task shutting down");
                    break;
                }
            }
        }
    }
}
