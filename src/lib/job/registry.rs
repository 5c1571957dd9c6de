//! ## Job Registry
//!
//! Owns every live [`JobTemplate`] and validates shares submitted against them.
//!
//! Jobs are indexed twice: by block context (the previous block hash they build on) and by job
//! id. Only one block context is retained at a time. Registering a template for a new context
//! evicts every job of the previous one, so a miner still holding an old job id gets a
//! "not found" rejection.
use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tracing::{debug, error, info};

use super::{
    events::RegistryHooks,
    template::{JobTemplate, MiningNotify},
};
use crate::{
    error::{ConfigurationError, JobNotFound, SubmitError},
    extranonce::{ExtranonceAllocator, EXTRANONCE_SIZE},
    merkle,
    pow::PowHasher,
    target::{hash_to_u256, target_from_difficulty, u256_to_f64},
    ucp::pending::SubmitHandle,
    utils::{decode_hex_array, Mutex, TimeSource},
};

/// Forwards block candidates to the upstream node.
pub trait BlockSubmitter: Send + Sync {
    fn submit_block(
        &self,
        upstream_job_id: &Value,
        extranonce: u64,
        timestamp: u32,
        nonce: u32,
    ) -> SubmitHandle;
}

/// Outcome of an accepted share.
#[derive(Debug)]
pub struct ShareResult {
    pub header_hex: String,
    /// Proof-of-work hash as 48 hex characters.
    pub hash_hex: String,
    /// Set when the share was a block candidate and got forwarded upstream.
    pub block_submission: Option<SubmitHandle>,
}

#[derive(Debug, Default)]
struct RegistryData {
    jobs_by_block_context: HashMap<String, Vec<Arc<JobTemplate>>>,
    jobs_by_id: HashMap<String, Arc<JobTemplate>>,
    last_job: Option<Arc<JobTemplate>>,
    last_is_new_block: bool,
}

pub struct JobRegistry {
    data: Mutex<RegistryData>,
    extranonce_allocator: ExtranonceAllocator,
    upstream: Arc<dyn BlockSubmitter>,
    hooks: Arc<dyn RegistryHooks>,
    hasher: Arc<dyn PowHasher>,
    clock: Arc<dyn TimeSource>,
}

impl JobRegistry {
    pub fn new(
        instance_id: u8,
        upstream: Arc<dyn BlockSubmitter>,
        hooks: Arc<dyn RegistryHooks>,
        hasher: Arc<dyn PowHasher>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            data: Mutex::new(RegistryData::default()),
            extranonce_allocator: ExtranonceAllocator::new(instance_id)?,
            upstream,
            hooks,
            hasher,
            clock,
        })
    }

    /// Extranonce for a newly subscribed connection.
    pub fn new_extranonce(&self) -> [u8; EXTRANONCE_SIZE] {
        self.extranonce_allocator.allocate()
    }

    pub fn extranonce_size(&self) -> usize {
        self.extranonce_allocator.size()
    }

    /// Registers `job`, dropping jobs of any other block context, then notifies the hooks.
    pub fn add_template(&self, job: JobTemplate) {
        let job = Arc::new(job);
        let context = job.block_context().to_string();

        let is_new_block = self.data.super_safe_lock(|data| {
            let is_new_block = !data.jobs_by_block_context.contains_key(&context);
            if is_new_block {
                data.jobs_by_block_context.clear();
                data.jobs_by_id.clear();
            }
            data.jobs_by_block_context
                .entry(context.clone())
                .or_default()
                .push(job.clone());
            data.jobs_by_id
                .insert(job.job_id().to_string(), job.clone());
            data.last_job = Some(job.clone());
            data.last_is_new_block = is_new_block;
            is_new_block
        });

        info!(
            job_id = job.job_id(),
            height = job.height(),
            is_new_block,
            "New template for {context}"
        );

        if is_new_block {
            self.hooks
                .on_network_difficulty(u256_to_f64(job.network_difficulty()));
            self.hooks.on_new_block(&context);
        }

        let mut notify = job.broadcast_args().clone();
        notify.clean_jobs = is_new_block;
        self.hooks.on_template(is_new_block, &notify);
    }

    /// Looks up a job that is still part of the retained block context.
    pub fn get_job(&self, job_id: &str) -> Result<Arc<JobTemplate>, JobNotFound> {
        let job = self.data.super_safe_lock(|data| {
            let job = data.jobs_by_id.get(job_id)?;
            let current = data.jobs_by_block_context.get(job.block_context())?;
            current
                .iter()
                .any(|live| Arc::ptr_eq(live, job))
                .then(|| job.clone())
        });
        job.ok_or_else(|| {
            info!("Job id '{job_id}' not found");
            JobNotFound(job_id.to_string())
        })
    }

    /// `mining.notify` parameters of the most recent template.
    ///
    /// `clean_jobs` tells whether that template started a new block context.
    pub fn get_last_broadcast_args(&self) -> Option<MiningNotify> {
        self.data.super_safe_lock(|data| {
            let job = data.last_job.as_ref()?;
            let mut notify = job.broadcast_args().clone();
            notify.clean_jobs = data.last_is_new_block;
            Some(notify)
        })
    }

    /// Validates a share and forwards it upstream when it also solves a block.
    ///
    /// All hex arguments are as sent by the miner. Checks run in a fixed order and the first
    /// failure is returned.
    pub fn submit_share(
        &self,
        job_id: &str,
        worker_name: &str,
        extranonce_hex: &str,
        ntime_hex: &str,
        nonce_hex: &str,
        difficulty: f64,
    ) -> Result<ShareResult, SubmitError> {
        if extranonce_hex.len() != EXTRANONCE_SIZE * 2 {
            return Err(SubmitError::ExtranonceSize {
                expected_chars: EXTRANONCE_SIZE * 2,
            });
        }

        let job = self.get_job(job_id)?;

        if ntime_hex.len() != 8 {
            return Err(SubmitError::NtimeSize);
        }
        let ntime = decode_hex_array::<4>(ntime_hex)
            .map(u32::from_be_bytes)
            .ok_or(SubmitError::InvalidHex { field: "ntime" })?;
        if !job.check_timestamp(ntime, self.clock.now()) {
            return Err(SubmitError::NtimeOutOfRange);
        }

        if nonce_hex.len() != 8 {
            return Err(SubmitError::NonceSize);
        }
        let extranonce = decode_hex_array::<EXTRANONCE_SIZE>(extranonce_hex)
            .map(u64::from_be_bytes)
            .ok_or(SubmitError::InvalidHex {
                field: "extranonce",
            })?;
        let nonce = decode_hex_array::<4>(nonce_hex)
            .map(u32::from_be_bytes)
            .ok_or(SubmitError::InvalidHex { field: "nonce" })?;

        if !job.register_submit(extranonce, ntime, nonce) {
            info!(
                "Duplicate from {worker_name}, ({extranonce} {ntime} {nonce})"
            );
            return Err(SubmitError::DuplicateShare);
        }

        let commitment_root = merkle::commit(job.commitments(), extranonce);
        let header = job.serialize_header(&commitment_root, ntime, nonce);
        let hash = self.hasher.hash(&header);
        let hash_value = hash_to_u256(&hash);
        let header_hex = hex::encode(header);
        let hash_hex = hex::encode(hash);

        let worker_target =
            target_from_difficulty(difficulty).ok_or(SubmitError::InvalidDifficulty(difficulty))?;
        if hash_value > worker_target {
            return Err(SubmitError::AboveTarget);
        }

        if hash_value < job.network_target() {
            info!("We found a block candidate! {hash_hex}");
            job.finalize(commitment_root, extranonce, ntime, nonce);
            if !job.is_valid(self.hasher.as_ref()) {
                error!(job_id, "Final job validation failed!");
            }
            let handle = self
                .upstream
                .submit_block(job.upstream_job_id(), extranonce, ntime, nonce);
            return Ok(ShareResult {
                header_hex,
                hash_hex,
                block_submission: Some(handle),
            });
        }

        debug!(job_id, worker_name, "Accepted share {hash_hex}");
        Ok(ShareResult {
            header_hex,
            hash_hex,
            block_submission: None,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use tokio::sync::oneshot;

    #[derive(Debug)]
    pub struct RecordedSubmit {
        pub upstream_job_id: Value,
        pub extranonce: u64,
        pub timestamp: u32,
        pub nonce: u32,
        pub reply: oneshot::Sender<bool>,
    }

    /// Keeps every forwarded block so tests can inspect and answer it.
    #[derive(Debug, Default)]
    pub struct RecordingSubmitter {
        pub submits: Mutex<Vec<RecordedSubmit>>,
    }

    impl BlockSubmitter for RecordingSubmitter {
        fn submit_block(
            &self,
            upstream_job_id: &Value,
            extranonce: u64,
            timestamp: u32,
            nonce: u32,
        ) -> SubmitHandle {
            let (reply, handle) = SubmitHandle::channel();
            self.submits.super_safe_lock(|s| {
                s.push(RecordedSubmit {
                    upstream_job_id: upstream_job_id.clone(),
                    extranonce,
                    timestamp,
                    nonce,
                    reply,
                })
            });
            handle
        }
    }
}
