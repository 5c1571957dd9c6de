//! Commitment root binding a job's fixed hashes to a per-connection extranonce.
use sha2::{Digest, Sha256};

/// Length of the commitment root placed in the header.
pub const COMMITMENT_ROOT_SIZE: usize = 16;

/// Number of intermediate commitments carried by a job.
pub const COMMITMENT_COUNT: usize = 3;

/// Size of each intermediate commitment.
pub const COMMITMENT_SIZE: usize = 32;

pub type Commitments = [[u8; COMMITMENT_SIZE]; COMMITMENT_COUNT];

/// Computes the commitment root of `commitments` for `extranonce`.
///
/// `commitments` is `[pop_tx_root, normal_tx_root, metapackage_hash]`:
///
/// ```text
/// tx_root = sha256(pop_tx_root || normal_tx_root)
/// meta    = sha256(metapackage_hash || be64(extranonce))
/// root    = sha256(meta || tx_root)[..16]
/// ```
pub fn commit(commitments: &Commitments, extranonce: u64) -> [u8; COMMITMENT_ROOT_SIZE] {
    let [pop_tx_root, normal_tx_root, metapackage_hash] = commitments;

    let tx_root = Sha256::new()
        .chain_update(pop_tx_root)
        .chain_update(normal_tx_root)
        .finalize();
    let meta = Sha256::new()
        .chain_update(metapackage_hash)
        .chain_update(extranonce.to_be_bytes())
        .finalize();
    let root = Sha256::new()
        .chain_update(meta)
        .chain_update(tx_root)
        .finalize();

    let mut out = [0u8; COMMITMENT_ROOT_SIZE];
    out.copy_from_slice(&root[..COMMITMENT_ROOT_SIZE]);
    out
}
