//! UCP wire messages.
//!
//! Every line is one JSON object whose `command` field selects the message. Each payload field
//! is wrapped as `{"type": <TYPE_NAME>, "data": <value>}`.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UpstreamProtocolError;

/// A payload field with its UCP type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Typed<T> {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub data: T,
}

impl<T> Typed<T> {
    pub fn new(kind: &str, data: T) -> Self {
        Self {
            kind: kind.to_string(),
            data,
        }
    }
}

fn request_id(id: u64) -> Typed<u64> {
    Typed::new("REQUEST_ID", id)
}

/// Messages sent to the upstream node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command")]
pub enum Outbound {
    #[serde(rename = "MINING_AUTH")]
    Auth {
        request_id: Typed<u64>,
        username: Typed<String>,
        password: Typed<String>,
    },
    #[serde(rename = "MINING_SUBSCRIBE")]
    Subscribe {
        request_id: Typed<u64>,
        update_frequency_ms: Typed<u64>,
    },
    #[serde(rename = "MINING_SUBMIT")]
    Submit {
        request_id: Typed<u64>,
        job_id: Typed<Value>,
        #[serde(rename = "nTime")]
        timestamp: Typed<u32>,
        nonce: Typed<u32>,
        extra_nonce: Typed<u64>,
    },
}

impl Outbound {
    pub fn auth(id: u64, username: &str, password: &str) -> Self {
        Outbound::Auth {
            request_id: request_id(id),
            username: Typed::new("USERNAME", username.to_string()),
            password: Typed::new("PASSWORD", password.to_string()),
        }
    }

    pub fn subscribe(id: u64, update_frequency_ms: u64) -> Self {
        Outbound::Subscribe {
            request_id: request_id(id),
            update_frequency_ms: Typed::new("FREQUENCY_MS", update_frequency_ms),
        }
    }

    pub fn submit(id: u64, job_id: Value, timestamp: u32, nonce: u32, extranonce: u64) -> Self {
        Outbound::Submit {
            request_id: request_id(id),
            job_id: Typed::new("JOB_ID", job_id),
            timestamp: Typed::new("TIMESTAMP", timestamp),
            nonce: Typed::new("NONCE", nonce),
            extra_nonce: Typed::new("EXTRA_NONCE", extranonce),
        }
    }

    pub fn request_id(&self) -> u64 {
        match self {
            Outbound::Auth { request_id, .. }
            | Outbound::Subscribe { request_id, .. }
            | Outbound::Submit { request_id, .. } => request_id.data,
        }
    }
}

/// Messages received from the upstream node. Unknown commands are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
pub enum Inbound {
    #[serde(rename = "MINING_AUTH_SUCCESS")]
    AuthSuccess,
    #[serde(rename = "MINING_SUBMIT_SUCCESS")]
    SubmitSuccess { request_id: Typed<u64> },
    #[serde(rename = "MINING_SUBMIT_FAILURE")]
    SubmitFailure { request_id: Typed<u64> },
    #[serde(rename = "MINING_JOB")]
    Job(Box<MiningJob>),
    #[serde(other)]
    Unknown,
}

impl Inbound {
    pub fn parse(line: &str) -> Result<Self, UpstreamProtocolError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// A numeric job field, sent either as a JSON number or as a hex string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Hex(String),
}

impl Numeric {
    fn as_i64(&self, field: &'static str) -> Result<i64, UpstreamProtocolError> {
        match self {
            Numeric::Int(v) => Ok(*v),
            Numeric::Hex(s) => {
                let digits = s.trim_start_matches("0x");
                i64::from_str_radix(digits, 16).map_err(|_| UpstreamProtocolError::InvalidNumber {
                    field,
                    value: s.clone(),
                })
            }
        }
    }

    /// Decodes the field and narrows it to `T`.
    pub fn decode<T: TryFrom<i64>>(&self, field: &'static str) -> Result<T, UpstreamProtocolError> {
        let value = self.as_i64(field)?;
        T::try_from(value).map_err(|_| UpstreamProtocolError::InvalidNumber {
            field,
            value: value.to_string(),
        })
    }
}

/// A new job pushed by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningJob {
    /// Node side job id, echoed back verbatim on submit.
    pub job_id: Typed<Value>,
    pub block_index: Typed<Numeric>,
    pub block_version: Typed<Numeric>,
    pub previous_block_hash: Typed<String>,
    pub second_previous_block_hash: Typed<String>,
    pub third_previous_block_hash: Typed<String>,
    pub merkle_root: Typed<String>,
    pub pop_transaction_merkle_root: Typed<String>,
    pub normal_transaction_merkle_root: Typed<String>,
    pub intermediate_metapackage_hash: Typed<String>,
    pub difficulty: Typed<Numeric>,
    pub timestamp: Typed<Numeric>,
}

/// Decodes a hex job field.
pub fn decode_hex_field(field: &'static str, value: &str) -> Result<Vec<u8>, UpstreamProtocolError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|source| UpstreamProtocolError::InvalidHex { field, source })
}
