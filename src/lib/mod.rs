//! ## UCP Pool
//!
//! Core of a Stratum mining pool fed by an upstream node speaking UCP.
//!
//! The central component is [`UcpPool`]. It wires together:
//! - the [`UpstreamFeedClient`](ucp::UpstreamFeedClient), which turns node jobs into
//!   [`JobTemplate`](job::JobTemplate)s and relays block submissions,
//! - the [`JobRegistry`](job::JobRegistry), which owns live jobs and validates shares,
//! - the [`VarDiffController`](vardiff::VarDiffController), which retargets worker difficulty,
//! - and a [`MiningService`](service::MiningService) handed to the miner-facing transport.
//!
//! New job parameters are published on a broadcast channel for the transport to forward as
//! `mining.notify`.
use std::{sync::Arc, time::Duration};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    config::PoolConfig,
    error::PoolResult,
    job::{JobRegistry, JobTemplate, MiningNotify, RegistryEvent},
    pow::PowHasher,
    service::{AllowAllWorkers, LoggingShareObserver, MiningService, ShareObserver, WorkerAuthorizer},
    status::{handle_error, State, Status, StatusSender},
    task_manager::TaskManager,
    ucp::{UpstreamFeedClient, UpstreamHandle},
    utils::{ShutdownMessage, SystemClock, TimeSource},
    vardiff::VarDiffController,
};

pub mod config;
pub mod error;
pub mod extranonce;
pub mod job;
pub mod logging;
pub mod merkle;
pub mod pow;
pub mod service;
pub mod session;
pub mod status;
pub mod target;
mod task_manager;
pub mod ucp;
pub mod utils;
pub mod vardiff;

/// How many `mining.notify` payloads a slow transport may lag behind.
const NOTIFY_CHANNEL_SIZE: usize = 16;

/// The pluggable collaborators of a [`UcpPool`].
pub struct PoolParts {
    /// Header hash of the mined chain. Never defaulted.
    pub hasher: Arc<dyn PowHasher>,
    pub authorizer: Arc<dyn WorkerAuthorizer>,
    pub observer: Arc<dyn ShareObserver>,
    pub clock: Arc<dyn TimeSource>,
}

impl PoolParts {
    /// `hasher` with an authorizer accepting every worker, share logging and the system clock.
    pub fn new(hasher: Arc<dyn PowHasher>) -> Self {
        Self {
            hasher,
            authorizer: Arc::new(AllowAllWorkers),
            observer: Arc::new(LoggingShareObserver),
            clock: Arc::new(SystemClock),
        }
    }

    /// Same as [`Self::new`] with the hasher named by `pow_algorithm` in `config`.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.pow_algorithm.hasher())
    }
}

pub struct UcpPool {
    service: MiningService,
    registry: Arc<JobRegistry>,
    vardiff: Arc<VarDiffController>,
    observer: Arc<dyn ShareObserver>,
    client: UpstreamFeedClient,
    templates_rx: async_channel::Receiver<JobTemplate>,
    events_rx: async_channel::Receiver<RegistryEvent>,
    notify_tx: broadcast::Sender<MiningNotify>,
    notify_shutdown: broadcast::Sender<ShutdownMessage>,
}

impl UcpPool {
    pub fn new(config: PoolConfig, parts: PoolParts) -> PoolResult<Self> {
        config.validate()?;

        let (templates_tx, templates_rx) = async_channel::unbounded();
        let (events_tx, events_rx) = async_channel::unbounded();
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_SIZE);
        let (notify_shutdown, _) = broadcast::channel(NOTIFY_CHANNEL_SIZE);

        let client = UpstreamFeedClient::new(config.upstream.clone(), templates_tx);
        let registry = Arc::new(JobRegistry::new(
            config.instance_id,
            Arc::new(client.handle()),
            Arc::new(events_tx),
            parts.hasher,
            parts.clock.clone(),
        )?);
        let vardiff = Arc::new(VarDiffController::new(config.vardiff.clone()));
        let service = MiningService::new(
            registry.clone(),
            vardiff.clone(),
            parts.authorizer,
            parts.observer.clone(),
            parts.clock,
            config.pool_difficulty,
        );
        debug!("Pool components initialized.");

        Ok(Self {
            service,
            registry,
            vardiff,
            observer: parts.observer,
            client,
            templates_rx,
            events_rx,
            notify_tx,
            notify_shutdown,
        })
    }

    /// Entry points for the miner-facing transport.
    pub fn service(&self) -> MiningService {
        self.service.clone()
    }

    /// `mining.notify` payloads, one per registered template.
    pub fn subscribe_notify(&self) -> broadcast::Receiver<MiningNotify> {
        self.notify_tx.subscribe()
    }

    pub fn upstream(&self) -> UpstreamHandle {
        self.client.handle()
    }

    /// Sending [`ShutdownMessage::ShutdownAll`] here stops a running pool.
    pub fn shutdown_sender(&self) -> broadcast::Sender<ShutdownMessage> {
        self.notify_shutdown.clone()
    }

    /// Runs the pool until Ctrl+C, a shutdown message or a fatal component error.
    pub async fn start(self) {
        info!("Starting UCP pool...");

        let Self {
            service,
            registry,
            vardiff,
            observer,
            client,
            templates_rx,
            events_rx,
            notify_tx,
            notify_shutdown,
            ..
        } = self;

        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);
        let task_manager = Arc::new(TaskManager::new());
        let (status_sender, status_receiver) = async_channel::unbounded::<Status>();

        task_manager.spawn(client.run(
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
            StatusSender::Upstream(status_sender.clone()),
        ));

        Self::run_template_intake(
            registry,
            templates_rx,
            notify_shutdown.subscribe(),
            shutdown_complete_tx.clone(),
            StatusSender::TemplateIntake(status_sender.clone()),
            &task_manager,
        );

        Self::run_registry_events(
            service,
            vardiff,
            observer,
            notify_tx,
            events_rx,
            notify_shutdown.subscribe(),
            shutdown_complete_tx.clone(),
            StatusSender::RegistryEvents(status_sender),
            &task_manager,
        );

        let mut shutdown_rx = notify_shutdown.subscribe();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, initiating graceful shutdown...");
                    let _ = notify_shutdown.send(ShutdownMessage::ShutdownAll);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested.");
                    break;
                }
                message = status_receiver.recv() => {
                    let Ok(status) = message else { continue };
                    match status.state {
                        State::UpstreamShutdown(e) => {
                            warn!("Upstream stopped: {e}, initiating full shutdown.");
                        }
                        State::TemplateIntakeShutdown(e) => {
                            warn!("Template intake stopped: {e}, initiating full shutdown.");
                        }
                        State::RegistryEventsShutdown(e) => {
                            warn!("Registry event handling stopped: {e}, initiating full shutdown.");
                        }
                    }
                    let _ = notify_shutdown.send(ShutdownMessage::ShutdownAll);
                    break;
                }
            }
        }

        drop(shutdown_complete_tx);
        info!("Waiting for shutdown completion signals from subsystems...");
        let shutdown_timeout = Duration::from_secs(5);
        tokio::select! {
            _ = shutdown_complete_rx.recv() => {
                info!("All subsystems reported shutdown complete.");
            }
            _ = tokio::time::sleep(shutdown_timeout) => {
                warn!("Graceful shutdown timed out after {shutdown_timeout:?}, forcing shutdown.");
                task_manager.abort_all();
            }
        }
        info!("Joining remaining tasks...");
        task_manager.join_all().await;
        info!("UCP pool shutdown complete.");
    }

    /// Registers every template coming from the upstream client.
    fn run_template_intake(
        registry: Arc<JobRegistry>,
        templates_rx: async_channel::Receiver<JobTemplate>,
        mut shutdown_rx: broadcast::Receiver<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: StatusSender,
        task_manager: &TaskManager,
    ) {
        task_manager.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Template intake: received shutdown signal. Exiting loop.");
                        break;
                    }
                    template = templates_rx.recv() => {
                        match template {
                            Ok(template) => registry.add_template(template),
                            Err(e) => {
                                error!("Template intake: upstream channel closed: {e}");
                                handle_error(&status_sender, e.into()).await;
                                break;
                            }
                        }
                    }
                }
            }
            drop(shutdown_complete_tx);
        });
    }

    /// Reacts to registry changes off the registry lock.
    #[allow(clippy::too_many_arguments)]
    fn run_registry_events(
        service: MiningService,
        vardiff: Arc<VarDiffController>,
        observer: Arc<dyn ShareObserver>,
        notify_tx: broadcast::Sender<MiningNotify>,
        events_rx: async_channel::Receiver<RegistryEvent>,
        mut shutdown_rx: broadcast::Receiver<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: StatusSender,
        task_manager: &TaskManager,
    ) {
        task_manager.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Registry events: received shutdown signal. Exiting loop.");
                        break;
                    }
                    event = events_rx.recv() => {
                        match event {
                            Ok(RegistryEvent::NetworkDifficulty(difficulty)) => {
                                vardiff.update_network_difficulty(difficulty);
                            }
                            Ok(RegistryEvent::NewBlock(prev_hash)) => {
                                observer.on_network_block(&prev_hash);
                                service.prune_idle_workers();
                            }
                            Ok(RegistryEvent::Template { is_new_block, notify }) => {
                                debug!("Broadcasting job {} (new block: {is_new_block})", notify.job_id);
                                if notify_tx.send(notify).is_err() {
                                    debug!("No transport listening for mining.notify");
                                }
                            }
                            Err(e) => {
                                error!("Registry events: channel closed: {e}");
                                handle_error(&status_sender, e.into()).await;
                                break;
                            }
                        }
                    }
                }
            }
            drop(shutdown_complete_tx);
        });
    }
}
