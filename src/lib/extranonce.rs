//! Pool-wide extranonce allocation.
//!
//! The 6 most significant bits of every extranonce carry the pool instance id, so several pool
//! processes behind the same upstream node never hand out the same value. The remaining bits are
//! a counter advanced by [`EXTRANONCE_STEP`] per allocation.
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ConfigurationError;

/// Size in bytes of an allocated extranonce.
pub const EXTRANONCE_SIZE: usize = 8;

/// Counter increment per allocation. Values in between stay free for sub-allocation.
pub const EXTRANONCE_STEP: u64 = 1_000_000;

const INSTANCE_ID_SHIFT: u32 = 58;
const MAX_INSTANCE_ID: u8 = 31;

#[derive(Debug)]
pub struct ExtranonceAllocator {
    counter: AtomicU64,
}

impl ExtranonceAllocator {
    pub fn new(instance_id: u8) -> Result<Self, ConfigurationError> {
        if instance_id > MAX_INSTANCE_ID {
            return Err(ConfigurationError::InvalidInstanceId(instance_id));
        }
        Ok(Self {
            counter: AtomicU64::new((instance_id as u64) << INSTANCE_ID_SHIFT),
        })
    }

    /// Returns the next extranonce, big-endian encoded.
    pub fn allocate(&self) -> [u8; EXTRANONCE_SIZE] {
        let value = self
            .counter
            .fetch_add(EXTRANONCE_STEP, Ordering::Relaxed)
            .wrapping_add(EXTRANONCE_STEP);
        value.to_be_bytes()
    }

    pub fn size(&self) -> usize {
        EXTRANONCE_SIZE
    }
}
