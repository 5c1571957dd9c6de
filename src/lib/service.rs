//! ## Mining Service
//!
//! The calls a miner-facing Stratum transport makes into the pool core: `mining.subscribe`,
//! `mining.authorize` and `mining.submit`, plus the job parameters used to prime a freshly
//! subscribed connection.
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    error::SubmitError,
    job::{JobRegistry, MiningNotify},
    session::MinerConnection,
    utils::TimeSource,
    vardiff::VarDiffController,
};

/// Decides whether a worker may submit shares.
pub trait WorkerAuthorizer: Send + Sync {
    fn authorize(&self, worker_name: &str, password: &str) -> bool;
}

impl<F> WorkerAuthorizer for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authorize(&self, worker_name: &str, password: &str) -> bool {
        self(worker_name, password)
    }
}

/// Accepts every worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllWorkers;

impl WorkerAuthorizer for AllowAllWorkers {
    fn authorize(&self, _worker_name: &str, _password: &str) -> bool {
        true
    }
}

/// Share accounting hooks.
pub trait ShareObserver: Send + Sync {
    /// A template for a new block context was registered.
    fn on_network_block(&self, prev_hash: &str);

    /// Every submission past the authorization checks. `header_hex` and `hash_hex` are only set
    /// for accepted shares.
    fn on_submit_share(
        &self,
        worker_name: &str,
        header_hex: Option<&str>,
        hash_hex: Option<&str>,
        difficulty: f64,
        timestamp: u64,
        accepted: bool,
    );

    /// Verdict of the node on a forwarded block, `None` if it never answered.
    fn on_submit_block(
        &self,
        accepted: Option<bool>,
        worker_name: &str,
        header_hex: &str,
        hash_hex: &str,
        timestamp: u64,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingShareObserver;

impl ShareObserver for LoggingShareObserver {
    fn on_network_block(&self, prev_hash: &str) {
        info!("New block on the network: {prev_hash}");
    }

    fn on_submit_share(
        &self,
        worker_name: &str,
        _header_hex: Option<&str>,
        hash_hex: Option<&str>,
        difficulty: f64,
        _timestamp: u64,
        accepted: bool,
    ) {
        if accepted {
            debug!(
                "Share from {worker_name} at difficulty {difficulty} accepted: {}",
                hash_hex.unwrap_or_default()
            );
        } else {
            debug!("Share from {worker_name} at difficulty {difficulty} rejected");
        }
    }

    fn on_submit_block(
        &self,
        accepted: Option<bool>,
        worker_name: &str,
        _header_hex: &str,
        hash_hex: &str,
        _timestamp: u64,
    ) {
        match accepted {
            Some(true) => info!("Block {hash_hex} from {worker_name} accepted by the node"),
            Some(false) => warn!("Block {hash_hex} from {worker_name} refused by the node"),
            None => warn!("Block {hash_hex} from {worker_name} got no answer from the node"),
        }
    }
}

#[derive(Clone)]
pub struct MiningService {
    registry: Arc<JobRegistry>,
    vardiff: Arc<VarDiffController>,
    authorizer: Arc<dyn WorkerAuthorizer>,
    observer: Arc<dyn ShareObserver>,
    clock: Arc<dyn TimeSource>,
    pool_difficulty: f64,
}

impl MiningService {
    pub fn new(
        registry: Arc<JobRegistry>,
        vardiff: Arc<VarDiffController>,
        authorizer: Arc<dyn WorkerAuthorizer>,
        observer: Arc<dyn ShareObserver>,
        clock: Arc<dyn TimeSource>,
        pool_difficulty: f64,
    ) -> Self {
        Self {
            registry,
            vardiff,
            authorizer,
            observer,
            clock,
            pool_difficulty,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Hands the connection its extranonce and the starting difficulty.
    ///
    /// Returns the extranonce as hex and its size in bytes.
    pub fn subscribe(&self, connection: &dyn MinerConnection) -> (String, usize) {
        let extranonce = self.registry.new_extranonce();
        connection.session().super_safe_lock(|session| {
            session.extranonce = Some(extranonce);
            session.difficulty = self.pool_difficulty;
        });
        (hex::encode(extranonce), self.registry.extranonce_size())
    }

    pub fn authorize(
        &self,
        connection: &dyn MinerConnection,
        worker_name: &str,
        password: &str,
    ) -> bool {
        let authorized = self.authorizer.authorize(worker_name, password);
        connection.session().super_safe_lock(|session| {
            if authorized {
                session
                    .authorized
                    .insert(worker_name.to_string(), password.to_string());
            } else {
                session.authorized.remove(worker_name);
            }
        });
        authorized
    }

    /// Forgets everything tied to a closed connection. Its authorized workers lose their vardiff
    /// statistics and the session is left unsubscribed and unauthorized.
    pub fn disconnect(&self, connection: &dyn MinerConnection) {
        let workers = connection.session().super_safe_lock(|session| {
            session.extranonce = None;
            std::mem::take(&mut session.authorized)
        });
        for worker_name in workers.keys() {
            self.vardiff.forget_worker(worker_name);
        }
        debug!("Connection closed, released {} workers", workers.len());
    }

    /// Drops vardiff statistics of workers that stopped submitting without disconnecting.
    pub fn prune_idle_workers(&self) -> usize {
        self.vardiff.prune_idle(self.clock.now())
    }

    /// Validates a `mining.submit` and does the bookkeeping around it.
    pub fn submit(
        &self,
        connection: &dyn MinerConnection,
        worker_name: &str,
        job_id: &str,
        extranonce_hex: &str,
        ntime_hex: &str,
        nonce_hex: &str,
    ) -> Result<(), SubmitError> {
        let (password, subscribed, difficulty) = connection.session().super_safe_lock(|s| {
            (
                s.authorized.get(worker_name).cloned(),
                s.extranonce.is_some(),
                s.difficulty,
            )
        });

        match password {
            Some(password) if self.authorizer.authorize(worker_name, &password) => {}
            _ => return Err(SubmitError::WorkerNotAuthorized),
        }
        if !subscribed {
            return Err(SubmitError::NotSubscribed);
        }

        let timestamp = self.clock.now();
        let result = match self.registry.submit_share(
            job_id,
            worker_name,
            extranonce_hex,
            ntime_hex,
            nonce_hex,
            difficulty,
        ) {
            Ok(result) => result,
            Err(e) => {
                debug!("Rejected share from {worker_name}: {e}");
                self.observer
                    .on_submit_share(worker_name, None, None, difficulty, timestamp, false);
                return Err(e);
            }
        };

        self.observer.on_submit_share(
            worker_name,
            Some(&result.header_hex),
            Some(&result.hash_hex),
            difficulty,
            timestamp,
            true,
        );
        self.vardiff
            .submit(connection, worker_name, timestamp, difficulty);

        if let Some(submission) = result.block_submission {
            let observer = self.observer.clone();
            let worker_name = worker_name.to_string();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        let accepted = submission.await;
                        observer.on_submit_block(
                            accepted,
                            &worker_name,
                            &result.header_hex,
                            &result.hash_hex,
                            timestamp,
                        );
                    });
                }
                Err(e) => warn!("Not awaiting block submission outside of a runtime: {e}"),
            }
        }
        Ok(())
    }

    /// Latest job parameters with `clean_jobs` set, for a connection that just subscribed.
    pub fn notify_args_for_new_subscriber(&self) -> Option<MiningNotify> {
        let mut notify = self.registry.get_last_broadcast_args()?;
        notify.clean_jobs = true;
        Some(notify)
    }
}
