//! ## Upstream Feed Client
//!
//! Keeps a single UCP connection to the upstream node alive for the lifetime of the pool.
//!
//! The client walks `Disconnected → Connecting → Authenticating → Ready`: once the TCP connection
//! is up it sends `MINING_AUTH`, and on `MINING_AUTH_SUCCESS` it sends `MINING_SUBSCRIBE` and
//! starts relaying block submissions. Every `MINING_JOB` becomes a [`JobTemplate`] pushed to the
//! template channel. Any transport or protocol failure tears the connection down, drops the
//! pending submissions and reconnects after an [`ExponentialBackoff`] delay.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use serde_json::Value;
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};

use super::{
    backoff::ExponentialBackoff,
    messages::{Inbound, Outbound},
    pending::{PendingRequests, SubmitHandle},
};
use crate::{
    config::UpstreamConfig,
    error::{PoolError, PoolResult, UpstreamProtocolError},
    job::{BlockSubmitter, JobIdFactory, JobTemplate},
    status::{handle_error, StatusSender},
    utils::{Mutex, ShutdownMessage},
};

/// Longest line accepted from the node.
pub const MAX_LINE_LENGTH: usize = 1 << 16;

/// Capacity of the queue of messages waiting to be written to the node.
const OUTBOUND_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Cloneable handle for talking to the connection owned by [`UpstreamFeedClient`].
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    state: Arc<Mutex<ConnectionState>>,
    next_request_id: Arc<AtomicU64>,
    pending: Arc<PendingRequests>,
    outbound: async_channel::Sender<Outbound>,
}

impl UpstreamHandle {
    pub fn state(&self) -> ConnectionState {
        self.state.super_safe_lock(|state| *state)
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl BlockSubmitter for UpstreamHandle {
    fn submit_block(
        &self,
        upstream_job_id: &Value,
        extranonce: u64,
        timestamp: u32,
        nonce: u32,
    ) -> SubmitHandle {
        let request_id = self.next_request_id();
        let handle = self.pending.insert(request_id);
        let message = Outbound::submit(
            request_id,
            upstream_job_id.clone(),
            timestamp,
            nonce,
            extranonce,
        );
        if let Err(e) = self.outbound.try_send(message) {
            error!("Unable to queue block submission {request_id}: {e}");
            self.pending.forget(request_id);
        }
        handle
    }
}

pub struct UpstreamFeedClient {
    config: UpstreamConfig,
    handle: UpstreamHandle,
    outbound_rx: async_channel::Receiver<Outbound>,
    job_ids: JobIdFactory,
    templates: async_channel::Sender<JobTemplate>,
}

impl UpstreamFeedClient {
    /// Templates built from incoming jobs are sent to `templates`.
    pub fn new(config: UpstreamConfig, templates: async_channel::Sender<JobTemplate>) -> Self {
        let (outbound, outbound_rx) = async_channel::bounded(OUTBOUND_QUEUE_SIZE);
        Self {
            config,
            handle: UpstreamHandle {
                state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
                next_request_id: Arc::new(AtomicU64::new(1)),
                pending: Arc::new(PendingRequests::default()),
                outbound,
            },
            outbound_rx,
            job_ids: JobIdFactory::new(),
            templates,
        }
    }

    pub fn handle(&self) -> UpstreamHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    fn set_state(&self, state: ConnectionState) -> PoolResult<()> {
        self.handle.state.safe_lock(|s| *s = state)?;
        Ok(())
    }

    /// Connects and reconnects until a `ShutdownAll` is received.
    ///
    /// Only a closed template channel stops the loop on its own, reported through
    /// `status_sender`.
    pub async fn run(
        mut self,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: StatusSender,
    ) {
        let mut shutdown_rx = notify_shutdown.subscribe();
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(self.config.reconnect_min_delay_ms),
            Duration::from_millis(self.config.reconnect_max_delay_ms),
        );

        loop {
            let result = tokio::select! {
                message = shutdown_rx.recv() => {
                    match message {
                        Ok(ShutdownMessage::ShutdownAll) => {
                            info!("Upstream: received ShutdownAll signal. Exiting loop.");
                        }
                        Err(e) => {
                            error!("Upstream: failed to receive shutdown signal: {e}");
                        }
                    }
                    break;
                }
                result = self.connect_and_serve(&mut backoff) => result,
            };
            self.teardown();

            if let Err(e) = result {
                if matches!(e, PoolError::ChannelErrorSender) {
                    error!("Upstream: template channel closed, stopping");
                    handle_error(&status_sender, e).await;
                    break;
                }
                warn!("Upstream connection lost: {e}");
            }

            let delay = backoff.next_delay();
            info!("Reconnecting to upstream in {delay:?}");
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Upstream: shutdown requested while waiting to reconnect.");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.teardown();
        warn!("Upstream: task shutting down cleanly.");
        drop(shutdown_complete_tx);
    }

    async fn connect_and_serve(&mut self, backoff: &mut ExponentialBackoff) -> PoolResult<()> {
        let address = (self.config.address.as_str(), self.config.port);
        let stream = TcpStream::connect(address).await?;
        info!(
            "Connected to upstream at {}:{}",
            self.config.address, self.config.port
        );
        backoff.reset();
        self.set_state(ConnectionState::Connecting)?;

        let (reader, mut writer) = stream.into_split();
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        let auth = Outbound::auth(
            self.handle.next_request_id(),
            &self.config.username,
            &self.config.password,
        );
        send(&mut writer, &auth).await?;
        self.set_state(ConnectionState::Authenticating)?;

        loop {
            let ready = self.state() == ConnectionState::Ready;
            tokio::select! {
                line = lines.next() => {
                    let line = match line {
                        Some(Ok(line)) => line,
                        Some(Err(e)) => return Err(UpstreamProtocolError::from(e).into()),
                        None => return Err(UpstreamProtocolError::ConnectionClosed.into()),
                    };
                    debug!("Received from upstream: {line}");
                    self.on_line(&line, &mut writer).await?;
                }
                message = self.outbound_rx.recv(), if ready => {
                    send(&mut writer, &message?).await?;
                }
            }
        }
    }

    async fn on_line(&mut self, line: &str, writer: &mut OwnedWriteHalf) -> PoolResult<()> {
        match Inbound::parse(line)? {
            Inbound::AuthSuccess => {
                if self.state() != ConnectionState::Authenticating {
                    debug!("Ignoring repeated MINING_AUTH_SUCCESS");
                    return Ok(());
                }
                let subscribe = Outbound::subscribe(
                    self.handle.next_request_id(),
                    self.config.update_frequency_ms,
                );
                send(writer, &subscribe).await?;
                self.set_state(ConnectionState::Ready)?;
                info!("Upstream authenticated and subscribed");
            }
            Inbound::SubmitSuccess { request_id } => {
                if !self.handle.pending.resolve(request_id.data, true) {
                    debug!("No pending submission for request {}", request_id.data);
                }
            }
            Inbound::SubmitFailure { request_id } => {
                warn!("Upstream refused submission {}", request_id.data);
                if !self.handle.pending.resolve(request_id.data, false) {
                    debug!("No pending submission for request {}", request_id.data);
                }
            }
            Inbound::Job(job) => {
                let template = JobTemplate::fill_from_upstream(self.job_ids.next(), &job)?;
                debug!(
                    "Upstream job {} registered as {} (merkle root {})",
                    template.upstream_job_id(),
                    template.job_id(),
                    hex::encode(template.base_merkle_root())
                );
                self.templates.send(template).await?;
            }
            Inbound::Unknown => debug!("Ignoring unhandled upstream command"),
        }
        Ok(())
    }

    /// Forgets the current connection: pending submissions and queued messages are dropped.
    fn teardown(&self) {
        if self.state() != ConnectionState::Disconnected {
            info!("Upstream disconnected");
        }
        self.handle
            .state
            .super_safe_lock(|s| *s = ConnectionState::Disconnected);
        let dropped = self.handle.pending.clear();
        if dropped > 0 {
            warn!("Dropped {dropped} unanswered block submissions");
        }
        while self.outbound_rx.try_recv().is_ok() {}
    }
}

async fn send(writer: &mut OwnedWriteHalf, message: &Outbound) -> PoolResult<()> {
    let mut line = serde_json::to_string(message)?;
    debug!("Sending to upstream: {line}");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}
