//! ## Error Module
//!
//! Defines [`PoolError`], the top-level error type of the pool core, and the domain errors it
//! wraps:
//! - [`ConfigurationError`]: invalid settings, fatal at startup.
//! - [`SubmitError`]: every reason a share submission is rejected. Always recoverable.
//! - [`JobNotFound`]: job lookup miss, folded into [`SubmitError`] by the registry.
//! - [`UpstreamProtocolError`]: malformed traffic from the upstream node. The connection is torn
//!   down and re-established.
use std::{fmt, sync::PoisonError};

use tokio_util::codec::LinesCodecError;

pub type PoolResult<T> = core::result::Result<T, PoolError>;

#[derive(Debug)]
pub enum PoolError {
    /// Errors loading the configuration file.
    ConfigError(ext_config::ConfigError),
    /// Configuration values that parse but make no sense.
    Configuration(ConfigurationError),
    /// Errors on bad CLI argument input.
    BadCliArgs,
    /// Errors on bad `serde_json` serialize/deserialize.
    BadSerdeJson(serde_json::Error),
    /// Errors on bad `TcpStream` connection.
    Io(std::io::Error),
    UpstreamProtocol(UpstreamProtocolError),
    SubmissionRejected(SubmitError),
    // Locking Errors
    PoisonLock,
    // Channel Receiver Error
    ChannelErrorReceiver(async_channel::RecvError),
    // Channel Sender Error
    ChannelErrorSender,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PoolError::*;
        match self {
            ConfigError(e) => write!(f, "Config error: {e:?}"),
            Configuration(e) => write!(f, "Invalid configuration: {e}"),
            BadCliArgs => write!(f, "Bad CLI arg input"),
            BadSerdeJson(ref e) => write!(f, "Bad serde json: `{e:?}`"),
            Io(ref e) => write!(f, "I/O error: `{e:?}`"),
            UpstreamProtocol(ref e) => write!(f, "Upstream protocol error: {e}"),
            SubmissionRejected(ref e) => write!(f, "Share rejected: {e}"),
            PoisonLock => write!(f, "Poison Lock error"),
            ChannelErrorReceiver(ref e) => write!(f, "Channel receive error: `{e:?}`"),
            ChannelErrorSender => write!(f, "Channel send error"),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<ext_config::ConfigError> for PoolError {
    fn from(e: ext_config::ConfigError) -> PoolError {
        PoolError::ConfigError(e)
    }
}

impl From<ConfigurationError> for PoolError {
    fn from(e: ConfigurationError) -> PoolError {
        PoolError::Configuration(e)
    }
}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> PoolError {
        PoolError::Io(e)
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(e: serde_json::Error) -> PoolError {
        PoolError::BadSerdeJson(e)
    }
}

impl From<UpstreamProtocolError> for PoolError {
    fn from(e: UpstreamProtocolError) -> PoolError {
        PoolError::UpstreamProtocol(e)
    }
}

impl From<SubmitError> for PoolError {
    fn from(e: SubmitError) -> PoolError {
        PoolError::SubmissionRejected(e)
    }
}

impl From<async_channel::RecvError> for PoolError {
    fn from(e: async_channel::RecvError) -> PoolError {
        PoolError::ChannelErrorReceiver(e)
    }
}

impl<T> From<async_channel::SendError<T>> for PoolError {
    fn from(_: async_channel::SendError<T>) -> PoolError {
        PoolError::ChannelErrorSender
    }
}

impl<T> From<PoisonError<T>> for PoolError {
    fn from(_e: PoisonError<T>) -> PoolError {
        PoolError::PoisonLock
    }
}

/// Settings rejected at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The extranonce allocator only has room for instance ids `0..=31`.
    InvalidInstanceId(u8),
    /// A difficulty setting that must be strictly positive.
    NonPositiveDifficulty { name: &'static str, value: f64 },
    InvalidDifficultyBounds { min: f64, max: f64 },
    /// The retarget window must cover at least one target interval.
    InvalidVardiffTiming { target_time: u64, retarget_time: u64 },
    InvalidVariancePercent(f64),
    NegativeMinChange(f64),
    InvalidReconnectDelay { min_ms: u64, max_ms: u64 },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigurationError::*;
        match self {
            InvalidInstanceId(id) => write!(f, "instance_id {id} is outside of <0, 31>"),
            NonPositiveDifficulty { name, value } => {
                write!(f, "{name} must be greater than zero, got {value}")
            }
            InvalidDifficultyBounds { min, max } => {
                write!(f, "vardiff min_difficulty {min} is above max_difficulty {max}")
            }
            InvalidVardiffTiming {
                target_time,
                retarget_time,
            } => write!(
                f,
                "vardiff retarget_time {retarget_time}s must be >= target_time {target_time}s and target_time must be non zero"
            ),
            InvalidVariancePercent(v) => write!(f, "vardiff variance_percent {v} is outside of [0, 100)"),
            NegativeMinChange(v) => write!(f, "vardiff min_change {v} must not be negative"),
            InvalidReconnectDelay { min_ms, max_ms } => write!(
                f,
                "reconnect delay bounds are invalid: min {min_ms}ms, max {max_ms}ms"
            ),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Job lookup miss: the id is unknown or belongs to an evicted block context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotFound(pub String);

impl fmt::Display for JobNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job '{}' not found", self.0)
    }
}

/// Reasons a share submission is rejected.
///
/// The `Display` output is the human-readable reason returned to the miner.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitError {
    WorkerNotAuthorized,
    NotSubscribed,
    ExtranonceSize { expected_chars: usize },
    JobNotFound(String),
    NtimeSize,
    NtimeOutOfRange,
    NonceSize,
    InvalidHex { field: &'static str },
    DuplicateShare,
    AboveTarget,
    InvalidDifficulty(f64),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SubmitError::*;
        match self {
            WorkerNotAuthorized => write!(f, "Worker is not authorized"),
            NotSubscribed => write!(f, "Connection is not subscribed for mining"),
            ExtranonceSize { expected_chars } => write!(
                f,
                "Incorrect size of extranonce. Expected {expected_chars} chars"
            ),
            JobNotFound(job_id) => write!(f, "Job '{job_id}' not found"),
            NtimeSize => write!(f, "Incorrect size of ntime. Expected 8 chars"),
            NtimeOutOfRange => write!(f, "Ntime out of range"),
            NonceSize => write!(f, "Incorrect size of nonce. Expected 8 chars"),
            InvalidHex { field } => write!(f, "Field {field} is not valid hex"),
            DuplicateShare => write!(f, "Duplicate share"),
            AboveTarget => write!(f, "Share is above target"),
            InvalidDifficulty(d) => write!(f, "Session difficulty {d} is not usable"),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<JobNotFound> for SubmitError {
    fn from(e: JobNotFound) -> Self {
        SubmitError::JobNotFound(e.0)
    }
}

/// Malformed or unexpected traffic from the upstream node.
#[derive(Debug)]
pub enum UpstreamProtocolError {
    InvalidJson(serde_json::Error),
    InvalidHex {
        field: &'static str,
        source: hex::FromHexError,
    },
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    InvalidNumber {
        field: &'static str,
        value: String,
    },
    /// The compact difficulty decodes to zero or to more than 256 bits.
    InvalidCompactDifficulty(u32),
    LineCodec(LinesCodecError),
    ConnectionClosed,
}

impl fmt::Display for UpstreamProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use UpstreamProtocolError::*;
        match self {
            InvalidJson(e) => write!(f, "invalid json line: {e}"),
            InvalidHex { field, source } => write!(f, "field {field} is not valid hex: {source}"),
            InvalidLength {
                field,
                expected,
                actual,
            } => write!(
                f,
                "field {field} has {actual} bytes, expected {expected}"
            ),
            InvalidNumber { field, value } => {
                write!(f, "field {field} is not a valid number: `{value}`")
            }
            InvalidCompactDifficulty(bits) => {
                write!(f, "compact difficulty {bits:#010x} is out of range")
            }
            LineCodec(e) => write!(f, "line framing error: {e}"),
            ConnectionClosed => write!(f, "connection closed by upstream"),
        }
    }
}

impl std::error::Error for UpstreamProtocolError {}

impl From<serde_json::Error> for UpstreamProtocolError {
    fn from(e: serde_json::Error) -> Self {
        UpstreamProtocolError::InvalidJson(e)
    }
}

impl From<LinesCodecError> for UpstreamProtocolError {
    fn from(e: LinesCodecError) -> Self {
        UpstreamProtocolError::LineCodec(e)
    }
}
