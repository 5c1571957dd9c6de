//! Proof-of-work hash used to score serialized headers.
//!
//! The registry never hashes directly: it goes through [`PowHasher`], and a pool is always built
//! with an explicit hasher. The header hash must be the one miners and the upstream node use
//! (vBlake on VeriBlock networks), otherwise good shares are rejected as above target and block
//! candidates are refused by the node. Embedders plug their own implementation in through
//! [`PoolParts`](crate::PoolParts); the binary picks one of the [`PowAlgorithm`]s named in its
//! configuration.
use std::sync::Arc;

use serde::Deserialize;

use crate::target::POW_HASH_SIZE;

pub trait PowHasher: Send + Sync {
    /// Hashes a serialized header into a 24-byte digest, compared big-endian against targets.
    fn hash(&self, header: &[u8]) -> [u8; POW_HASH_SIZE];
}

/// Header hashes the binary can be configured with.
///
/// There is no default: `pow_algorithm` must be set in the configuration file.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowAlgorithm {
    /// [`Blake3Pow`].
    Blake3,
}

impl PowAlgorithm {
    pub fn hasher(self) -> Arc<dyn PowHasher> {
        match self {
            PowAlgorithm::Blake3 => Arc::new(Blake3Pow),
        }
    }
}

/// BLAKE3 in extendable output mode truncated to 24 bytes.
///
/// Only matches networks whose miners hash headers with BLAKE3. It is not vBlake.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3Pow;

impl PowHasher for Blake3Pow {
    fn hash(&self, header: &[u8]) -> [u8; POW_HASH_SIZE] {
        let mut out = [0u8; POW_HASH_SIZE];
        blake3::Hasher::new()
            .update(header)
            .finalize_xof()
            .fill(&mut out);
        out
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_pow_is_prefix_of_xof() {
        let header = [7u8; 64];
        let digest = Blake3Pow.hash(&header);
        assert_eq!(digest[..], blake3::hash(&header).as_bytes()[..POW_HASH_SIZE]);
    }

    #[test]
    fn test_algorithm_selects_hasher() {
        let header = [1u8; 64];
        assert_eq!(
            PowAlgorithm::Blake3.hasher().hash(&header),
            Blake3Pow.hash(&header)
        );
    }

    #[test]
    fn test_blake3_pow_depends_on_every_byte() {
        let mut header = [0u8; 64];
        let base = Blake3Pow.hash(&header);
        header[63] = 1;
        assert_ne!(Blake3Pow.hash(&header), base);
    }
}
