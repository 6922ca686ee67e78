//! BTS Task Framework
//!
//! This module implements the actor-based task model with message passing for
//! the roaming bridge. Each task runs as an independent async task and
//! communicates via typed message channels.
//!
//! # Architecture
//!
//! The bridge uses the following tasks:
//! - **App Task**: Management CLI handling, status reporting
//! - **Roaming Task**: Registration/auth, call/SMS/USSD routing, subscriber
//!   store ownership, periodic expiry sweep
//! - **Handover Task**: Neighbor polling, inbound/outbound handover
//!   negotiation
//!
//! # Task Lifecycle
//!
//! Tasks follow a lifecycle managed by `TaskManager`:
//! 1. **Created**: Task is instantiated but not yet running
//! 2. **Running**: Task is actively processing messages
//! 3. **Stopping**: Task received shutdown signal, cleaning up
//! 4. **Stopped**: Task has terminated
//! 5. **Failed**: Task terminated due to an error

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use roamlink_common::config::BtsConfig;
use roamlink_common::{Imsi, RoamingError};

use crate::handover::{HandoverAccept, InboundDialog, Neighbor};
use crate::roaming::{RegisterOutcome, RegisterRequest, RouteRequest, RouteVerdict, Subscriber};

// ============================================================================
// Task Message Envelope
// ============================================================================

/// Task message envelope wrapping typed messages with control signals.
///
/// This enum provides a uniform way to send messages to tasks while also
/// supporting graceful shutdown signaling.
#[derive(Debug)]
pub enum TaskMessage<T> {
    /// Regular message payload
    Message(T),
    /// Shutdown signal - task should terminate gracefully
    Shutdown,
}

impl<T> TaskMessage<T> {
    /// Creates a new message envelope containing the given payload.
    pub fn message(msg: T) -> Self {
        TaskMessage::Message(msg)
    }

    /// Creates a shutdown signal.
    pub fn shutdown() -> Self {
        TaskMessage::Shutdown
    }

    /// Returns true if this is a shutdown signal.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TaskMessage::Shutdown)
    }

    /// Returns the message payload if present, or None for shutdown.
    pub fn into_message(self) -> Option<T> {
        match self {
            TaskMessage::Message(msg) => Some(msg),
            TaskMessage::Shutdown => None,
        }
    }
}

// ============================================================================
// Task Lifecycle State
// ============================================================================

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Task is created but not yet started
    #[default]
    Created,
    /// Task is running and processing messages
    Running,
    /// Task is in the process of stopping
    Stopping,
    /// Task has stopped gracefully
    Stopped,
    /// Task terminated due to an error
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Created => write!(f, "Created"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Stopping => write!(f, "Stopping"),
            TaskState::Stopped => write!(f, "Stopped"),
            TaskState::Failed => write!(f, "Failed"),
        }
    }
}

/// Task identifier for the bridge tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskId {
    /// Application task
    App,
    /// Roaming task
    Roaming,
    /// Handover task
    Handover,
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskId::App => write!(f, "App"),
            TaskId::Roaming => write!(f, "Roaming"),
            TaskId::Handover => write!(f, "Handover"),
        }
    }
}

/// Information about a running task.
#[derive(Debug)]
pub struct TaskInfo {
    /// Task identifier
    pub id: TaskId,
    /// Current state
    pub state: TaskState,
    /// Time when the task was started
    pub started_at: Option<Instant>,
    /// Time when the task was stopped
    pub stopped_at: Option<Instant>,
    /// Error message if task failed
    pub error: Option<String>,
}

// ============================================================================
// Task Trait
// ============================================================================

/// Base trait for all bridge tasks.
///
/// Tasks are async actors that process messages from their receive channel.
/// Each task implementation defines its own message type and processing logic.
#[async_trait::async_trait]
pub trait Task: Send + 'static {
    /// The message type this task processes.
    type Message: Send;

    /// Runs the task's main loop, processing messages until shutdown.
    async fn run(&mut self, rx: mpsc::Receiver<TaskMessage<Self::Message>>);
}

// ============================================================================
// Message Types
// ============================================================================

/// Messages for the Application task.
#[derive(Debug)]
pub enum AppMessage {
    /// Status update from another task
    StatusUpdate(StatusUpdate),
    /// CLI command received
    CliCommand(CliCommand),
}

/// Status update information.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Status type identifier
    pub status_type: StatusType,
    /// Status value
    pub value: bool,
}

/// Types of status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    /// Local radio is up/down
    RadioIsUp,
}

/// A management CLI command with its reply channel.
#[derive(Debug)]
pub struct CliCommand {
    /// Raw command line
    pub line: String,
    /// Channel for the rendered response; None when the command was
    /// unhandled
    pub reply: oneshot::Sender<Option<String>>,
}

/// Messages for the Roaming task.
#[derive(Debug)]
pub enum RoamingMessage {
    /// Registration attempt from the radio side
    Register {
        /// The attempt
        request: RegisterRequest,
        /// Outcome channel
        reply: oneshot::Sender<Result<RegisterOutcome, RoamingError>>,
    },
    /// Deregister and forget a subscriber
    Unregister {
        /// Subscriber to detach
        imsi: Imsi,
    },
    /// Routing request (call, SMS, USSD, handover continuation)
    Route {
        /// The request
        request: RouteRequest,
        /// Verdict channel
        reply: oneshot::Sender<Result<RouteVerdict, RoamingError>>,
    },
    /// A tracked call ended
    CallEnded {
        /// Subscriber whose call ended
        imsi: Imsi,
    },
    /// Subscriber table snapshot (CLI)
    Snapshot {
        /// Reply channel
        reply: oneshot::Sender<Vec<Subscriber>>,
    },
    /// NNSF node table (CLI)
    Nodes {
        /// Reply channel
        reply: oneshot::Sender<Vec<(u8, String)>>,
    },
    /// Forget one or all subscribers (CLI). Returns the count removed.
    Forget {
        /// Specific IMSI, or None for all
        imsi: Option<Imsi>,
        /// Reply channel
        reply: oneshot::Sender<usize>,
    },
}

/// Messages for the Handover task.
#[derive(Debug)]
pub enum HandoverMessage {
    /// The radio side wants a call moved to a better cell
    HandoverRequired {
        /// Dialog being moved
        call_id: String,
        /// Candidate peer addresses, best first
        candidates: Vec<String>,
        /// First acceptance, or None when every candidate declined
        reply: oneshot::Sender<Option<HandoverAccept>>,
    },
    /// An accepted handover subsequently failed
    HandoverFailure {
        /// Dialog whose handover failed
        call_id: String,
        /// Failure reason from the radio side
        reason: String,
    },
    /// A peer requests an inbound handover
    InboundRequest {
        /// Dialog correlation data from the peer
        dialog: InboundDialog,
        /// Granted reference, or None when no resource was available
        reply: oneshot::Sender<Option<u8>>,
    },
    /// Neighbor table snapshot (CLI)
    Neighbors {
        /// Reply channel
        reply: oneshot::Sender<Vec<Neighbor>>,
    },
}

// ============================================================================
// Task Handle
// ============================================================================

/// Handle for sending messages to a task.
///
/// This is a wrapper around `mpsc::Sender` that provides convenient methods
/// for sending messages and shutdown signals.
#[derive(Debug)]
pub struct TaskHandle<T> {
    tx: mpsc::Sender<TaskMessage<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> TaskHandle<T> {
    /// Creates a new task handle from a sender.
    pub fn new(tx: mpsc::Sender<TaskMessage<T>>) -> Self {
        Self { tx }
    }

    /// Sends a message to the task.
    ///
    /// Returns an error if the task has been dropped.
    pub async fn send(&self, msg: T) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Message(msg)).await
    }

    /// Sends a message to the task without waiting.
    ///
    /// Returns an error if the channel is full or the task has been dropped.
    pub fn try_send(&self, msg: T) -> Result<(), mpsc::error::TrySendError<TaskMessage<T>>> {
        self.tx.try_send(TaskMessage::Message(msg))
    }

    /// Sends a shutdown signal to the task.
    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<TaskMessage<T>>> {
        self.tx.send(TaskMessage::Shutdown).await
    }

    /// Returns true if the task channel is closed.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// BTS Task Base
// ============================================================================

/// Base structure containing all task handles for the bridge.
///
/// This structure is shared among all tasks to enable inter-task
/// communication. Each task receives a clone of this structure and can send
/// messages to any other task through the appropriate handle.
#[derive(Clone)]
pub struct BtsTaskBase {
    /// Bridge configuration
    pub config: Arc<BtsConfig>,
    /// Handle to the Application task
    pub app_tx: TaskHandle<AppMessage>,
    /// Handle to the Roaming task
    pub roaming_tx: TaskHandle<RoamingMessage>,
    /// Handle to the Handover task
    pub handover_tx: TaskHandle<HandoverMessage>,
}

impl BtsTaskBase {
    /// Creates a new `BtsTaskBase` with the given configuration and channel
    /// capacity.
    ///
    /// Returns the task base along with receivers for each task.
    #[allow(clippy::type_complexity)]
    pub fn new(
        config: BtsConfig,
        channel_capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<TaskMessage<AppMessage>>,
        mpsc::Receiver<TaskMessage<RoamingMessage>>,
        mpsc::Receiver<TaskMessage<HandoverMessage>>,
    ) {
        let (app_tx, app_rx) = mpsc::channel(channel_capacity);
        let (roaming_tx, roaming_rx) = mpsc::channel(channel_capacity);
        let (handover_tx, handover_rx) = mpsc::channel(channel_capacity);

        let base = Self {
            config: Arc::new(config),
            app_tx: TaskHandle::new(app_tx),
            roaming_tx: TaskHandle::new(roaming_tx),
            handover_tx: TaskHandle::new(handover_tx),
        };

        (base, app_rx, roaming_rx, handover_rx)
    }

    /// Sends shutdown signals to all tasks.
    pub async fn shutdown_all(&self) {
        // Ignore errors - tasks may already be shut down
        let _ = self.app_tx.shutdown().await;
        let _ = self.roaming_tx.shutdown().await;
        let _ = self.handover_tx.shutdown().await;
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Default channel capacity for task message queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default shutdown timeout in milliseconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Subscriber expiry sweep interval in seconds.
pub const SWEEP_INTERVAL_SECS: u64 = 20;

/// Neighbor poll interval in seconds.
pub const NEIGHBOR_POLL_INTERVAL_SECS: u64 = 10;

// ============================================================================
// Task Manager
// ============================================================================

/// Manages the lifecycle of all bridge tasks.
///
/// The `TaskManager` is responsible for:
/// - Spawning tasks and tracking their handles
/// - Monitoring task health and state
/// - Coordinating graceful shutdown across all tasks
pub struct TaskManager {
    /// Task base with all message channels
    task_base: BtsTaskBase,
    /// Task state information
    task_states: HashMap<TaskId, TaskInfo>,
    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,
    /// Shutdown signal receiver (cloneable)
    shutdown_rx: watch::Receiver<bool>,
    /// Join handles for spawned tasks
    join_handles: HashMap<TaskId, JoinHandle<Result<(), TaskError>>>,
}

/// Error type for task operations.
#[derive(Debug, Clone)]
pub struct TaskError {
    /// Task that failed
    pub task_id: TaskId,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task {} error: {}", self.task_id, self.message)
    }
}

impl std::error::Error for TaskError {}

impl TaskManager {
    /// Creates a new `TaskManager` with the given configuration.
    ///
    /// Returns the manager along with receivers for each task.
    #[allow(clippy::type_complexity)]
    pub fn new(
        config: BtsConfig,
        channel_capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<TaskMessage<AppMessage>>,
        mpsc::Receiver<TaskMessage<RoamingMessage>>,
        mpsc::Receiver<TaskMessage<HandoverMessage>>,
    ) {
        let (task_base, app_rx, roaming_rx, handover_rx) =
            BtsTaskBase::new(config, channel_capacity);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut task_states = HashMap::new();
        for task_id in [TaskId::App, TaskId::Roaming, TaskId::Handover] {
            task_states.insert(
                task_id,
                TaskInfo {
                    id: task_id,
                    state: TaskState::Created,
                    started_at: None,
                    stopped_at: None,
                    error: None,
                },
            );
        }

        let manager = Self {
            task_base,
            task_states,
            shutdown_tx,
            shutdown_rx,
            join_handles: HashMap::new(),
        };

        (manager, app_rx, roaming_rx, handover_rx)
    }

    /// Returns a clone of the task base for inter-task communication.
    pub fn task_base(&self) -> BtsTaskBase {
        self.task_base.clone()
    }

    /// Returns a receiver for the shutdown signal.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Gets the current state of a task.
    pub fn get_task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.task_states.get(&task_id).map(|info| info.state)
    }

    /// Gets information about a task.
    pub fn get_task_info(&self, task_id: TaskId) -> Option<&TaskInfo> {
        self.task_states.get(&task_id)
    }

    /// Returns true if all tasks are in the Running state.
    pub fn all_tasks_running(&self) -> bool {
        self.task_states
            .values()
            .all(|info| info.state == TaskState::Running)
    }

    /// Returns true if any task has failed.
    pub fn any_task_failed(&self) -> bool {
        self.task_states
            .values()
            .any(|info| info.state == TaskState::Failed)
    }

    /// Marks a task as started.
    pub fn mark_task_started(&mut self, task_id: TaskId) {
        if let Some(info) = self.task_states.get_mut(&task_id) {
            info.state = TaskState::Running;
            info.started_at = Some(Instant::now());
        }
    }

    /// Marks a task as stopped.
    pub fn mark_task_stopped(&mut self, task_id: TaskId) {
        if let Some(info) = self.task_states.get_mut(&task_id) {
            info.state = TaskState::Stopped;
            info.stopped_at = Some(Instant::now());
        }
    }

    /// Marks a task as failed with an error message.
    pub fn mark_task_failed(&mut self, task_id: TaskId, error: String) {
        if let Some(info) = self.task_states.get_mut(&task_id) {
            info.state = TaskState::Failed;
            info.stopped_at = Some(Instant::now());
            info.error = Some(error);
        }
    }

    /// Registers a join handle for a spawned task.
    pub fn register_task_handle(
        &mut self,
        task_id: TaskId,
        handle: JoinHandle<Result<(), TaskError>>,
    ) {
        self.join_handles.insert(task_id, handle);
    }

    /// Initiates graceful shutdown of all tasks.
    ///
    /// This sends shutdown signals to all tasks and waits for them to
    /// complete.
    pub async fn shutdown(&mut self) -> Result<(), TaskError> {
        let _ = self.shutdown_tx.send(true);

        for info in self.task_states.values_mut() {
            if info.state == TaskState::Running {
                info.state = TaskState::Stopping;
            }
        }

        self.task_base.shutdown_all().await;

        let timeout = tokio::time::Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS);
        let deadline = tokio::time::Instant::now() + timeout;

        let handles: Vec<_> = self.join_handles.drain().collect();
        let mut results: Vec<(TaskId, Result<(), String>)> = Vec::new();

        for (task_id, handle) in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let result = match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(e.message),
                Ok(Err(_join_error)) => Err("Task panicked".to_string()),
                Err(_timeout) => Err("Shutdown timeout".to_string()),
            };
            results.push((task_id, result));
        }

        for (task_id, result) in results {
            match result {
                Ok(()) => self.mark_task_stopped(task_id),
                Err(msg) => self.mark_task_failed(task_id, msg),
            }
        }

        if self.any_task_failed() {
            let failed: Vec<_> = self
                .task_states
                .values()
                .filter(|info| info.state == TaskState::Failed)
                .map(|info| {
                    format!(
                        "{}: {}",
                        info.id,
                        info.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            return Err(TaskError {
                task_id: TaskId::App,
                message: format!("Tasks failed during shutdown: {}", failed.join(", ")),
            });
        }

        Ok(())
    }

    /// Returns a summary of all task states.
    pub fn status_summary(&self) -> Vec<(TaskId, TaskState)> {
        self.task_states
            .iter()
            .map(|(id, info)| (*id, info.state))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
