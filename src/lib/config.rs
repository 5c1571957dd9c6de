//! ## Pool Configuration Module
//!
//! Defines [`PoolConfig`], the configuration structure of the pool core, loaded from a TOML file
//! with `ext-config` and deserialized with `serde`.
//!
//! This module handles:
//! - The pool instance id used to partition the extranonce space
//! - The upstream node address and credentials ([`UpstreamConfig`])
//! - Variable difficulty parameters ([`VardiffConfig`])
//! - The initial difficulty of freshly subscribed sessions
//! - The proof-of-work header hash, which has no default
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{error::ConfigurationError, pow::PowAlgorithm};

/// Configuration for the pool core.
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Identifies this pool process among its siblings. Must be in `0..=31`.
    pub instance_id: u8,
    /// Difficulty assigned to a session when it subscribes.
    pub pool_difficulty: f64,
    /// Header hash shares are checked with. Must match the one miners and the node use.
    pub pow_algorithm: PowAlgorithm,
    /// The upstream node this pool pulls jobs from.
    pub upstream: UpstreamConfig,
    /// Share rate retargeting parameters.
    pub vardiff: VardiffConfig,
    /// The path to the log file for the pool.
    log_file: Option<PathBuf>,
}

impl PoolConfig {
    /// Creates a new `PoolConfig` instance.
    pub fn new(
        instance_id: u8,
        pool_difficulty: f64,
        pow_algorithm: PowAlgorithm,
        upstream: UpstreamConfig,
        vardiff: VardiffConfig,
    ) -> Self {
        Self {
            instance_id,
            pool_difficulty,
            pow_algorithm,
            upstream,
            vardiff,
            log_file: None,
        }
    }

    pub fn set_log_dir(&mut self, log_dir: Option<PathBuf>) {
        if let Some(dir) = log_dir {
            self.log_file = Some(dir);
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Rejects settings the core can't run with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.instance_id > 31 {
            return Err(ConfigurationError::InvalidInstanceId(self.instance_id));
        }
        if self.pool_difficulty.is_nan() || self.pool_difficulty <= 0.0 {
            return Err(ConfigurationError::NonPositiveDifficulty {
                name: "pool_difficulty",
                value: self.pool_difficulty,
            });
        }
        self.upstream.validate()?;
        self.vardiff.validate()
    }
}

/// Connection settings for the upstream node.
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// The address of the upstream node.
    pub address: String,
    /// The port of the upstream node.
    pub port: u16,
    /// Wallet address the node credits mined blocks to.
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// How often the node should push refreshed jobs.
    #[serde(default = "default_update_frequency_ms")]
    pub update_frequency_ms: u64,
    #[serde(default = "default_reconnect_min_delay_ms")]
    pub reconnect_min_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_update_frequency_ms() -> u64 {
    5000
}

fn default_reconnect_min_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

impl UpstreamConfig {
    /// Creates a new `UpstreamConfig` with the default job update frequency and reconnect delays.
    pub fn new(address: String, port: u16, username: String) -> Self {
        Self {
            address,
            port,
            username,
            password: String::new(),
            update_frequency_ms: default_update_frequency_ms(),
            reconnect_min_delay_ms: default_reconnect_min_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.reconnect_min_delay_ms == 0
            || self.reconnect_min_delay_ms > self.reconnect_max_delay_ms
        {
            return Err(ConfigurationError::InvalidReconnectDelay {
                min_ms: self.reconnect_min_delay_ms,
                max_ms: self.reconnect_max_delay_ms,
            });
        }
        Ok(())
    }
}

/// Parameters of the per-worker difficulty control loop.
#[derive(Debug, Deserialize, Clone)]
pub struct VardiffConfig {
    /// Desired seconds between two shares of the same worker.
    pub target_time: u64,
    /// Minimum seconds between two retargets of the same worker.
    pub retarget_time: u64,
    /// Tolerated deviation from `target_time`, in percent.
    pub variance_percent: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    /// Smallest step applied in additive mode.
    #[serde(default = "default_min_change")]
    pub min_change: f64,
    /// Double or halve instead of moving by a computed delta.
    #[serde(default)]
    pub multiplicative: bool,
    /// Keep fractional deltas in additive mode instead of truncating them.
    #[serde(default)]
    pub float_deltas: bool,
}

fn default_min_change() -> f64 {
    1.0
}

impl VardiffConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.target_time == 0 || self.retarget_time < self.target_time {
            return Err(ConfigurationError::InvalidVardiffTiming {
                target_time: self.target_time,
                retarget_time: self.retarget_time,
            });
        }
        if !(0.0..100.0).contains(&self.variance_percent) {
            return Err(ConfigurationError::InvalidVariancePercent(
                self.variance_percent,
            ));
        }
        if self.min_difficulty.is_nan() || self.min_difficulty <= 0.0 {
            return Err(ConfigurationError::NonPositiveDifficulty {
                name: "vardiff.min_difficulty",
                value: self.min_difficulty,
            });
        }
        if self.min_difficulty > self.max_difficulty {
            return Err(ConfigurationError::InvalidDifficultyBounds {
                min: self.min_difficulty,
                max: self.max_difficulty,
            });
        }
        if self.min_change < 0.0 {
            return Err(ConfigurationError::NegativeMinChange(self.min_change));
        }
        Ok(())
    }

    /// Number of intervals kept per worker: four retarget windows worth of target intervals.
    pub fn buffer_size(&self) -> usize {
        ((self.retarget_time * 4) / self.target_time).max(1) as usize
    }
}
