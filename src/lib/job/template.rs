//! ## Job Template
//!
//! A [`JobTemplate`] is one minable job built from an upstream `MINING_JOB` notice. Its header
//! fields never change once built. The only mutable parts are the set of already submitted
//! solutions and the solution recorded when a share turns out to be a block candidate.
//!
//! Serialized header layout (64 bytes, big-endian integers):
//!
//! ```text
//! height(4) | version(2) | prev_hash(12) | prev_keystone(9) | second_keystone(9)
//!           | commitment_root(16) | timestamp(4) | difficulty_bits(4) | nonce(4)
//! ```
use std::collections::HashSet;

use primitive_types::U256;
use serde_json::{json, Value};

use crate::{
    error::UpstreamProtocolError,
    merkle::{self, Commitments, COMMITMENT_COUNT, COMMITMENT_ROOT_SIZE, COMMITMENT_SIZE},
    pow::PowHasher,
    target::{self, hash_to_u256, POW_HASH_SIZE},
    ucp::messages::{decode_hex_field, MiningJob},
    utils::Mutex,
};

/// Bytes of the previous block hash kept in the header.
pub const PREV_HASH_SIZE: usize = 12;
/// Bytes of each keystone hash kept in the header.
pub const KEYSTONE_SIZE: usize = 9;
pub const HEADER_SIZE: usize =
    4 + 2 + PREV_HASH_SIZE + 2 * KEYSTONE_SIZE + COMMITMENT_ROOT_SIZE + 4 + 4 + 4;

/// How far ahead of the local clock a share timestamp may be, in seconds.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 1000;

/// The solution recorded by [`JobTemplate::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    pub commitment_root: [u8; COMMITMENT_ROOT_SIZE],
    pub extranonce: u64,
    pub timestamp: u32,
    pub nonce: u32,
}

#[derive(Debug, Default)]
struct SolutionState {
    submitted: HashSet<(u64, u32, u32)>,
    solution: Option<Solution>,
    cached_hash: Option<[u8; POW_HASH_SIZE]>,
}

/// Job parameters pushed to miners with `mining.notify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningNotify {
    pub job_id: String,
    pub height: String,
    pub version: String,
    pub prev_hash: String,
    pub prev_keystone: String,
    pub second_keystone: String,
    pub commitments: [String; COMMITMENT_COUNT],
    pub time: String,
    pub difficulty: String,
    pub clean_jobs: bool,
}

impl MiningNotify {
    /// The 10 positional `mining.notify` params.
    pub fn to_params(&self) -> Value {
        json!([
            self.job_id,
            self.height,
            self.version,
            self.prev_hash,
            self.prev_keystone,
            self.second_keystone,
            self.commitments,
            self.time,
            self.difficulty,
            self.clean_jobs,
        ])
    }
}

#[derive(Debug)]
pub struct JobTemplate {
    job_id: String,
    upstream_job_id: Value,
    height: i32,
    version: i16,
    prev_hash: [u8; PREV_HASH_SIZE],
    prev_hash_hex: String,
    prev_keystone: [u8; KEYSTONE_SIZE],
    second_keystone: [u8; KEYSTONE_SIZE],
    base_merkle_root: Vec<u8>,
    commitments: Commitments,
    difficulty_bits: u32,
    curtime: u32,
    network_difficulty: U256,
    network_target: U256,
    broadcast: MiningNotify,
    state: Mutex<SolutionState>,
}

/// Keeps the last `N` bytes of a hex encoded hash.
fn tail<const N: usize>(field: &'static str, hex_str: &str) -> Result<[u8; N], UpstreamProtocolError> {
    let bytes = decode_hex_field(field, hex_str)?;
    if bytes.len() < N {
        return Err(UpstreamProtocolError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[bytes.len() - N..]);
    Ok(out)
}

fn commitment(field: &'static str, hex_str: &str) -> Result<[u8; COMMITMENT_SIZE], UpstreamProtocolError> {
    let bytes = decode_hex_field(field, hex_str)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| UpstreamProtocolError::InvalidLength {
            field,
            expected: COMMITMENT_SIZE,
            actual,
        })
}

impl JobTemplate {
    /// Builds a template with pool side id `job_id` from an upstream job notice.
    pub fn fill_from_upstream(job_id: String, job: &MiningJob) -> Result<Self, UpstreamProtocolError> {
        let height = job.block_index.data.decode::<i32>("block_index")?;
        let version = job.block_version.data.decode::<i16>("block_version")?;
        let difficulty_bits = job.difficulty.data.decode::<u32>("difficulty")?;
        let curtime = job.timestamp.data.decode::<u32>("timestamp")?;

        let prev_hash_hex = job.previous_block_hash.data.trim_start_matches("0x").to_lowercase();
        let prev_hash = tail::<PREV_HASH_SIZE>("previous_block_hash", &prev_hash_hex)?;
        let prev_keystone =
            tail::<KEYSTONE_SIZE>("second_previous_block_hash", &job.second_previous_block_hash.data)?;
        let second_keystone =
            tail::<KEYSTONE_SIZE>("third_previous_block_hash", &job.third_previous_block_hash.data)?;
        let base_merkle_root = decode_hex_field("merkle_root", &job.merkle_root.data)?;
        let commitments = [
            commitment("pop_transaction_merkle_root", &job.pop_transaction_merkle_root.data)?,
            commitment("normal_transaction_merkle_root", &job.normal_transaction_merkle_root.data)?,
            commitment("intermediate_metapackage_hash", &job.intermediate_metapackage_hash.data)?,
        ];

        let network_difficulty = target::difficulty_from_compact(difficulty_bits)?;
        let network_target = target::network_target(difficulty_bits)?;

        let broadcast = MiningNotify {
            job_id: job_id.clone(),
            height: hex::encode(height.to_be_bytes()),
            version: hex::encode(version.to_be_bytes()),
            prev_hash: hex::encode(prev_hash),
            prev_keystone: hex::encode(prev_keystone),
            second_keystone: hex::encode(second_keystone),
            commitments: commitments.map(hex::encode),
            time: hex::encode(curtime.to_be_bytes()),
            difficulty: hex::encode(difficulty_bits.to_be_bytes()),
            clean_jobs: true,
        };

        Ok(Self {
            job_id,
            upstream_job_id: job.job_id.data.clone(),
            height,
            version,
            prev_hash,
            prev_hash_hex,
            prev_keystone,
            second_keystone,
            base_merkle_root,
            commitments,
            difficulty_bits,
            curtime,
            network_difficulty,
            network_target,
            broadcast,
            state: Mutex::new(SolutionState::default()),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn upstream_job_id(&self) -> &Value {
        &self.upstream_job_id
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Full hex of the previous block hash, identifying the block context of this job.
    pub fn block_context(&self) -> &str {
        &self.prev_hash_hex
    }

    /// Root sent by the node before commitments are bound to an extranonce.
    pub fn base_merkle_root(&self) -> &[u8] {
        &self.base_merkle_root
    }

    pub fn commitments(&self) -> &Commitments {
        &self.commitments
    }

    pub fn difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    pub fn curtime(&self) -> u32 {
        self.curtime
    }

    pub fn network_difficulty(&self) -> U256 {
        self.network_difficulty
    }

    pub fn network_target(&self) -> U256 {
        self.network_target
    }

    /// Cached `mining.notify` parameters, with `clean_jobs` set.
    pub fn broadcast_args(&self) -> &MiningNotify {
        &self.broadcast
    }

    /// Rejects timestamps older than the job or more than [`MAX_FUTURE_DRIFT_SECS`] ahead of `now`.
    pub fn check_timestamp(&self, candidate: u32, now: u64) -> bool {
        candidate >= self.curtime && u64::from(candidate) <= now + MAX_FUTURE_DRIFT_SECS
    }

    /// Records a submitted solution. Returns `false` if the exact same one was seen before.
    pub fn register_submit(&self, extranonce: u64, timestamp: u32, nonce: u32) -> bool {
        self.state
            .super_safe_lock(|state| state.submitted.insert((extranonce, timestamp, nonce)))
    }

    pub fn serialize_header(
        &self,
        commitment_root: &[u8; COMMITMENT_ROOT_SIZE],
        timestamp: u32,
        nonce: u32,
    ) -> [u8; HEADER_SIZE] {
        let height = self.height.to_be_bytes();
        let version = self.version.to_be_bytes();
        let timestamp = timestamp.to_be_bytes();
        let bits = self.difficulty_bits.to_be_bytes();
        let nonce = nonce.to_be_bytes();
        let parts: [&[u8]; 9] = [
            &height,
            &version,
            &self.prev_hash,
            &self.prev_keystone,
            &self.second_keystone,
            commitment_root,
            &timestamp,
            &bits,
            &nonce,
        ];

        let mut header = [0u8; HEADER_SIZE];
        let mut offset = 0;
        for part in parts {
            header[offset..offset + part.len()].copy_from_slice(part);
            offset += part.len();
        }
        header
    }

    /// Stores the winning solution, dropping any previously computed hash.
    pub fn finalize(
        &self,
        commitment_root: [u8; COMMITMENT_ROOT_SIZE],
        extranonce: u64,
        timestamp: u32,
        nonce: u32,
    ) {
        self.state.super_safe_lock(|state| {
            state.solution = Some(Solution {
                commitment_root,
                extranonce,
                timestamp,
                nonce,
            });
            state.cached_hash = None;
        });
    }

    pub fn solution(&self) -> Option<Solution> {
        self.state.super_safe_lock(|state| state.solution)
    }

    // Caller holds the state lock.
    fn solution_hash(
        &self,
        state: &mut SolutionState,
        hasher: &dyn PowHasher,
    ) -> Option<(Solution, [u8; POW_HASH_SIZE])> {
        let solution = state.solution?;
        let hash = match state.cached_hash {
            Some(hash) => hash,
            None => {
                let header = self.serialize_header(
                    &solution.commitment_root,
                    solution.timestamp,
                    solution.nonce,
                );
                let hash = hasher.hash(&header);
                state.cached_hash = Some(hash);
                hash
            }
        };
        Some((solution, hash))
    }

    /// Hash of the header built from the finalized solution. `None` until [`Self::finalize`].
    pub fn proof_of_work_hash(&self, hasher: &dyn PowHasher) -> Option<[u8; POW_HASH_SIZE]> {
        self.state
            .super_safe_lock(|state| self.solution_hash(state, hasher).map(|(_, hash)| hash))
    }

    /// Re-checks a finalized block candidate: the hash is below the network target and the stored
    /// commitment root matches the one derived from the recorded extranonce.
    ///
    /// Solution and hash are read together, so a concurrent [`Self::finalize`] cannot pair one
    /// solution with another's hash.
    pub fn is_valid(&self, hasher: &dyn PowHasher) -> bool {
        let Some((solution, hash)) = self
            .state
            .super_safe_lock(|state| self.solution_hash(state, hasher))
        else {
            return false;
        };
        if hash_to_u256(&hash) >= self.network_target {
            return false;
        }
        merkle::commit(&self.commitments, solution.extranonce) == solution.commitment_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pow::{test_utils::FixedPow, Blake3Pow},
        ucp::messages::test_utils::mining_job,
    };

    fn template() -> JobTemplate {
        let prev = format!("{}{}", "00".repeat(12), "0123456789abcdef01234567");
        JobTemplate::fill_from_upstream("1".into(), &mining_job(55, &prev, 1_000)).unwrap()
    }

    #[test]
    fn test_fill_from_upstream_truncates_hashes() {
        let job = template();
        assert_eq!(job.block_context(), format!("{}{}", "00".repeat(12), "0123456789abcdef01234567"));
        assert_eq!(hex::encode(job.prev_hash), "0123456789abcdef01234567");
        assert_eq!(job.prev_keystone, [0xaa; KEYSTONE_SIZE]);
        assert_eq!(job.second_keystone, [0xbb; KEYSTONE_SIZE]);
        assert_eq!(job.base_merkle_root(), &[0xcc; 16]);
        assert_eq!(job.upstream_job_id(), &serde_json::json!(55));
        assert_eq!(job.network_target(), target::MAX_TARGET >> 16);
    }

    #[test]
    fn test_broadcast_args() {
        let notify = template().broadcast_args().clone();
        assert_eq!(notify.job_id, "1");
        assert_eq!(notify.height, "000f4240");
        assert_eq!(notify.version, "0002");
        assert_eq!(notify.prev_hash, "0123456789abcdef01234567");
        assert_eq!(notify.prev_keystone, "aa".repeat(9));
        assert_eq!(notify.commitments[2], "03".repeat(32));
        assert_eq!(notify.time, "000003e8");
        assert_eq!(notify.difficulty, "04000100");
        assert!(notify.clean_jobs);
        let params = notify.to_params();
        assert_eq!(params.as_array().unwrap().len(), 10);
        assert_eq!(params[6].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_short_prev_hash() {
        let job = mining_job(1, "abcd", 1);
        assert!(matches!(
            JobTemplate::fill_from_upstream("1".into(), &job),
            Err(UpstreamProtocolError::InvalidLength {
                field: "previous_block_hash",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_commitment_of_wrong_size() {
        let mut job = mining_job(1, &"11".repeat(24), 1);
        job.pop_transaction_merkle_root.data = "01".repeat(20);
        assert!(matches!(
            JobTemplate::fill_from_upstream("1".into(), &job),
            Err(UpstreamProtocolError::InvalidLength { expected: 32, actual: 20, .. })
        ));
    }

    #[test]
    fn test_check_timestamp_bounds() {
        let job = template();
        assert!(!job.check_timestamp(999, 2_000));
        assert!(job.check_timestamp(1_000, 2_000));
        assert!(job.check_timestamp(3_000, 2_000));
        assert!(!job.check_timestamp(3_001, 2_000));
    }

    #[test]
    fn test_register_submit_rejects_exact_duplicates() {
        let job = template();
        assert!(job.register_submit(1, 2, 3));
        assert!(!job.register_submit(1, 2, 3));
        assert!(job.register_submit(1, 2, 4));
    }

    #[test]
    fn test_header_layout() {
        let job = template();
        let header = job.serialize_header(&[0x55; 16], 0x0102_0304, 0xa0b0_c0d0);
        assert_eq!(header.len(), 64);
        assert_eq!(&header[0..4], &1_000_000i32.to_be_bytes());
        assert_eq!(&header[4..6], &[0, 2]);
        assert_eq!(hex::encode(&header[6..18]), "0123456789abcdef01234567");
        assert_eq!(&header[18..27], &[0xaa; 9]);
        assert_eq!(&header[27..36], &[0xbb; 9]);
        assert_eq!(&header[36..52], &[0x55; 16]);
        assert_eq!(&header[52..56], &[1, 2, 3, 4]);
        assert_eq!(&header[56..60], &[0x04, 0x00, 0x01, 0x00]);
        assert_eq!(&header[60..64], &[0xa0, 0xb0, 0xc0, 0xd0]);
    }

    #[test]
    fn test_finalize_invalidates_cached_hash() {
        let job = template();
        let hasher = FixedPow::leading(0);
        assert!(job.proof_of_work_hash(&hasher).is_none());

        job.finalize([1; 16], 5, 1_000, 1);
        let first = job.proof_of_work_hash(&hasher).unwrap();
        hasher.set([9; POW_HASH_SIZE]);
        assert_eq!(job.proof_of_work_hash(&hasher).unwrap(), first);

        job.finalize([1; 16], 5, 1_000, 2);
        assert_eq!(job.proof_of_work_hash(&hasher).unwrap(), [9; POW_HASH_SIZE]);
    }

    #[test]
    fn test_is_valid_checks_commitment_and_target() {
        let job = template();
        let hasher = FixedPow::leading(0);
        let root = merkle::commit(job.commitments(), 77);

        job.finalize(root, 77, 1_000, 1);
        assert!(job.is_valid(&hasher));

        job.finalize(root, 78, 1_000, 1);
        assert!(!job.is_valid(&hasher));

        job.finalize(root, 77, 1_000, 1);
        assert!(!job.is_valid(&FixedPow::leading(0xff)));
    }

    #[test]
    fn test_is_valid_hashes_the_finalized_header() {
        let job = template();
        let hasher = FixedPow::leading(0);
        let root = merkle::commit(job.commitments(), 77);
        job.finalize(root, 77, 1_001, 42);

        assert!(job.is_valid(&hasher));
        let seen = hasher.seen.super_safe_lock(|s| s.clone());
        assert_eq!(seen, vec![job.serialize_header(&root, 1_001, 42).to_vec()]);

        // Cached after the first check.
        assert!(job.is_valid(&hasher));
        assert_eq!(hasher.seen.super_safe_lock(|s| s.len()), 1);
    }

    #[test]
    fn test_is_valid_rejects_hash_equal_to_network_target() {
        let job = template();
        let root = merkle::commit(job.commitments(), 77);
        let network_target = job.network_target();
        let mut at_target = [0u8; POW_HASH_SIZE];
        for (i, byte) in at_target.iter_mut().rev().enumerate() {
            *byte = network_target.byte(i);
        }

        job.finalize(root, 77, 1_000, 1);
        assert!(!job.is_valid(&FixedPow::new(at_target)));
        job.finalize(root, 77, 1_000, 1);
        let mut below = at_target;
        below[POW_HASH_SIZE - 1] -= 1;
        assert!(job.is_valid(&FixedPow::new(below)));
    }

    #[test]
    fn test_blake3_hash_matches_serialized_header() {
        let job = template();
        job.finalize([3; 16], 1, 1_000, 9);
        let expected = Blake3Pow.hash(&job.serialize_header(&[3; 16], 1_000, 9));
        assert_eq!(job.proof_of_work_hash(&Blake3Pow), Some(expected));
    }
}
