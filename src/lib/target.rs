//! Target and difficulty arithmetic.
//!
//! Proof-of-work hashes are 24 bytes long and compared as big-endian unsigned integers, so every
//! target lives in the 192-bit domain below [`MAX_TARGET`]. Values are held in a
//! [`primitive_types::U256`] so intermediate products never overflow.
use primitive_types::{U256, U512};

use crate::error::UpstreamProtocolError;

/// Size in bytes of a proof-of-work hash.
pub const POW_HASH_SIZE: usize = 24;

/// Target of difficulty 1: `2^192 - 1`.
pub const MAX_TARGET: U256 = U256([u64::MAX, u64::MAX, u64::MAX, 0]);

/// Expands a compact encoded difficulty (`nBits`).
///
/// The top byte is a byte count and the low three bytes a mantissa, giving
/// `mantissa * 256^(size - 3)`. A zero result or one wider than 256 bits is rejected.
pub fn difficulty_from_compact(bits: u32) -> Result<U256, UpstreamProtocolError> {
    let size = (bits >> 24) as usize;
    let mantissa = U256::from(bits & 0x00ff_ffff);

    let value = if size <= 3 {
        mantissa >> (8 * (3 - size))
    } else {
        let shift = 8 * (size - 3);
        if mantissa.bits() + shift > 256 {
            return Err(UpstreamProtocolError::InvalidCompactDifficulty(bits));
        }
        mantissa << shift
    };

    if value.is_zero() {
        return Err(UpstreamProtocolError::InvalidCompactDifficulty(bits));
    }
    Ok(value)
}

/// Target a block hash must stay under for the network to accept it.
pub fn network_target(bits: u32) -> Result<U256, UpstreamProtocolError> {
    Ok(MAX_TARGET / difficulty_from_compact(bits)?)
}

/// Target matching a (possibly fractional) worker difficulty: `MAX_TARGET / difficulty`.
///
/// The float is split into its exact `mantissa * 2^exponent` form so the division is exact for
/// every positive finite value. Difficulties below `2^-64` saturate at `U256::MAX`.
/// Returns `None` for zero, negative or non finite difficulties.
pub fn target_from_difficulty(difficulty: f64) -> Option<U256> {
    if !difficulty.is_finite() || difficulty <= 0.0 {
        return None;
    }
    let bits = difficulty.to_bits();
    let exponent_bits = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exponent) = if exponent_bits == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), exponent_bits - 1075)
    };

    if exponent >= 0 {
        // A divisor of at least 2^192 is above every target.
        if exponent >= 192 {
            return Some(U256::zero());
        }
        return Some(MAX_TARGET / (U256::from(mantissa) << exponent as usize));
    }

    let shift = (-exponent) as usize;
    if shift >= 320 {
        return Some(U256::MAX);
    }
    let numerator = U512([u64::MAX, u64::MAX, u64::MAX, 0, 0, 0, 0, 0]) << shift;
    let quotient = numerator / U512::from(mantissa);
    if quotient.bits() > 256 {
        return Some(U256::MAX);
    }
    let words = quotient.0;
    Some(U256([words[0], words[1], words[2], words[3]]))
}

/// Lossy conversion used where a difficulty only feeds float comparisons.
pub fn u256_to_f64(value: U256) -> f64 {
    let high = (value >> 128).low_u128() as f64;
    let low = value.low_u128() as f64;
    high * 2.0f64.powi(128) + low
}

/// Interprets a proof-of-work hash as a big-endian integer.
pub fn hash_to_u256(hash: &[u8; POW_HASH_SIZE]) -> U256 {
    U256::from_big_endian(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_target_is_192_bits_of_ones() {
        assert_eq!(MAX_TARGET.bits(), 192);
        assert_eq!(MAX_TARGET + 1, U256::one() << 192);
    }

    #[test]
    fn test_compact_expansion() {
        assert_eq!(difficulty_from_compact(0x0300_0001).unwrap(), U256::one());
        assert_eq!(
            difficulty_from_compact(0x0412_3456).unwrap(),
            U256::from(0x1234_5600u64)
        );
        assert_eq!(difficulty_from_compact(0x0212_3456).unwrap(), U256::from(0x1234u64));
    }

    #[test]
    fn test_compact_rejects_zero_and_overflow() {
        assert!(matches!(
            difficulty_from_compact(0x0300_0000),
            Err(UpstreamProtocolError::InvalidCompactDifficulty(_))
        ));
        assert!(matches!(
            difficulty_from_compact(0x0100_00ff),
            Err(UpstreamProtocolError::InvalidCompactDifficulty(_))
        ));
        assert!(difficulty_from_compact(0x2200_ffff).is_err());
        assert!(difficulty_from_compact(0x2000_ffff).is_ok());
    }

    #[test]
    fn test_network_target_divides_max_target() {
        // 0x0400_0100 expands to 2^16
        assert_eq!(network_target(0x0400_0100).unwrap(), MAX_TARGET >> 16);
    }

    #[test]
    fn test_target_from_difficulty() {
        assert_eq!(target_from_difficulty(1.0).unwrap(), MAX_TARGET);
        assert_eq!(target_from_difficulty(2.0).unwrap(), MAX_TARGET / 2);
        assert_eq!(
            target_from_difficulty(0.5).unwrap(),
            (MAX_TARGET << 16) / U256::from(32_768u64)
        );
        assert_eq!(target_from_difficulty(3.0).unwrap(), MAX_TARGET / 3);
        assert!(target_from_difficulty(0.0).is_none());
        assert!(target_from_difficulty(-1.0).is_none());
        assert!(target_from_difficulty(f64::NAN).is_none());
    }

    #[test]
    fn test_target_from_large_difficulty() {
        let target = target_from_difficulty(1e34).unwrap();
        assert!(!target.is_zero());
        assert_eq!(target, MAX_TARGET / U256::from(1e34f64 as u128));
        assert!(!target_from_difficulty(5e33).unwrap().is_zero());

        let exact = 2.0f64.powi(150);
        assert_eq!(target_from_difficulty(exact).unwrap(), MAX_TARGET >> 150);
        assert_eq!(
            target_from_difficulty(2.0f64.powi(191)).unwrap(),
            U256::one()
        );
        assert!(target_from_difficulty(2.0f64.powi(192)).unwrap().is_zero());
        assert!(target_from_difficulty(f64::MAX).unwrap().is_zero());
    }

    #[test]
    fn test_target_from_tiny_difficulty_saturates() {
        assert_eq!(
            target_from_difficulty(2.0f64.powi(-60)).unwrap(),
            MAX_TARGET << 60
        );
        assert_eq!(target_from_difficulty(1e-70).unwrap(), U256::MAX);
        assert_eq!(target_from_difficulty(f64::MIN_POSITIVE).unwrap(), U256::MAX);
    }

    #[test]
    fn test_u256_to_f64() {
        assert_eq!(u256_to_f64(U256::from(1_000u64)), 1_000.0);
        assert_eq!(u256_to_f64(U256::one() << 130), 2.0f64.powi(130));
    }

    #[test]
    fn test_hash_is_big_endian() {
        let mut hash = [0u8; POW_HASH_SIZE];
        hash[POW_HASH_SIZE - 1] = 1;
        assert_eq!(hash_to_u256(&hash), U256::one());
        hash[0] = 0x80;
        assert_eq!(hash_to_u256(&hash).bits(), 192);
    }
}
