//! roam-bts - GSM roaming signaling bridge
//!
//! This is the main binary for the roaming bridge. It implements:
//! - CLI argument parsing
//! - Configuration loading and validation
//! - Task spawning and lifecycle management
//! - Graceful shutdown handling
//! - A line-based management shell on stdin (`roaming ...` commands)
//!
//! # Usage
//!
//! ```bash
//! roam-bts -c config/bts.yaml
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{error, info, warn};

use roamlink_common::config::load_and_validate_bts_config;
use roamlink_common::logging::{init_logging, LogLevel};

use roamlink_bts::{
    AppMessage, AppTask, CliCommand, FilePersistence, HandoverCoordinator, HandoverTask,
    LocalRadio, RoamingTask, Task, TaskError, TaskId, TaskManager, UdpSignalingChannel,
    DEFAULT_CHANNEL_CAPACITY,
};

/// roam-bts - GSM roaming signaling bridge
#[derive(Parser, Debug)]
#[command(name = "roam-bts")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the BTS configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: String,

    /// Path to the durable subscriber store
    #[arg(short = 's', long = "state-file", default_value = "subscribers.db")]
    state_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Disable the management shell on stdin
    #[arg(short = 'l', long = "disable-cmd")]
    disable_cmd: bool,
}

/// Application state for the bridge
struct BtsApp {
    /// Task manager for lifecycle management
    task_manager: TaskManager,
    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,
}

impl BtsApp {
    /// Creates the bridge from the given configuration and state paths.
    async fn new(config_path: &str, state_path: &str) -> Result<Self> {
        info!("Loading configuration from: {}", config_path);
        let config = load_and_validate_bts_config(config_path)
            .with_context(|| format!("Failed to load configuration from {config_path}"))?;

        info!(
            "Cell identity: PLMN={}-{}, LAC={}, CI={}",
            config.identity.mcc, config.identity.mnc, config.identity.lac, config.identity.ci
        );
        info!(
            "Core network: registrar={}, contact={}, NNSF nodes={}",
            config.roaming.reg_sip.as_deref().unwrap_or("-"),
            config.roaming.my_sip.as_deref().unwrap_or("-"),
            config.nnsf_nodes().len()
        );

        let (mut task_manager, app_rx, roaming_rx, handover_rx) =
            TaskManager::new(config, DEFAULT_CHANNEL_CAPACITY);
        let task_base = task_manager.task_base();
        let shutdown_rx = task_manager.shutdown_receiver();

        let transport = Arc::new(UdpSignalingChannel::new());
        let radio = Arc::new(LocalRadio);
        let coordinator = Arc::new(Mutex::new(HandoverCoordinator::new(
            task_base.config.clone(),
        )));

        // App task (status updates and management commands)
        let mut app_task = AppTask::new(task_base.clone());
        let handle = tokio::spawn(async move {
            app_task.run(app_rx).await;
            Ok::<(), TaskError>(())
        });
        task_manager.register_task_handle(TaskId::App, handle);
        task_manager.mark_task_started(TaskId::App);
        info!("App task spawned");

        // Roaming task (registration, routing, subscriber store)
        let mut roaming_task = RoamingTask::new(
            task_base.clone(),
            transport.clone(),
            coordinator.clone(),
            Box::new(FilePersistence::new(state_path)),
        );
        let handle = tokio::spawn(async move {
            roaming_task.run(roaming_rx).await;
            Ok::<(), TaskError>(())
        });
        task_manager.register_task_handle(TaskId::Roaming, handle);
        task_manager.mark_task_started(TaskId::Roaming);
        info!("Roaming task spawned");

        // Handover task (neighbor polling, handover negotiation)
        let mut handover_task = HandoverTask::new(task_base, transport, radio, coordinator);
        let handle = tokio::spawn(async move {
            handover_task.run(handover_rx).await;
            Ok::<(), TaskError>(())
        });
        task_manager.register_task_handle(TaskId::Handover, handle);
        task_manager.mark_task_started(TaskId::Handover);
        info!("Handover task spawned");

        Ok(Self {
            task_manager,
            shutdown_rx,
        })
    }

    /// Spawns the stdin management shell.
    fn spawn_cmd_shell(&self) {
        let app_tx = self.task_manager.task_base().app_tx;
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let (reply, reply_rx) = oneshot::channel();
                if app_tx
                    .send(AppMessage::CliCommand(CliCommand { line, reply }))
                    .await
                    .is_err()
                {
                    break;
                }
                match reply_rx.await {
                    Ok(Some(response)) => print!("{response}"),
                    Ok(None) => println!("unknown command"),
                    Err(_) => break,
                }
            }
        });
        info!("Management shell listening on stdin");
    }

    /// Runs the main event loop until shutdown
    async fn run(&mut self) -> Result<()> {
        info!("Bridge started, waiting for shutdown signal...");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = async {
                loop {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                    self.shutdown_rx.changed().await.ok();
                }
            } => {
                info!("Received shutdown signal from task manager");
            }
        }

        Ok(())
    }

    /// Performs graceful shutdown of all tasks
    async fn shutdown(mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        match self.task_manager.shutdown().await {
            Ok(()) => {
                info!("All tasks shut down successfully");
                Ok(())
            }
            Err(e) => {
                warn!("Some tasks failed during shutdown: {}", e);
                // Still return Ok since we're shutting down anyway
                Ok(())
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<LogLevel>()
        .unwrap_or(LogLevel::Info);
    init_logging(level);

    println!("roam-bts - GSM Roaming Signaling Bridge");
    println!("=======================================");

    match run_bts(args).await {
        Ok(()) => {
            info!("Bridge exited successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Bridge failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Main bridge execution logic
async fn run_bts(args: Args) -> Result<()> {
    let mut app = BtsApp::new(&args.config_file, &args.state_file).await?;

    if !args.disable_cmd {
        app.spawn_cmd_shell();
    }

    app.run().await?;
    app.shutdown().await?;

    Ok(())
}
