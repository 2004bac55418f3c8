//! Difficulty targets and the compact ("nBits") encoding
//!
//! A target is a 256-bit threshold: a header satisfies proof of work when its
//! hash, read as a big-endian integer, is strictly below the target. Headers
//! carry the target in a lossy 32-bit form: the high byte is a byte-length
//! exponent and the low 24 bits are the mantissa, so
//! `target = mantissa * 256^(exponent - 3)`.

use crate::types::Hash;
use num_bigint::BigUint;

/// Compact bits used by the default genesis header (roughly half of all
/// hashes qualify)
pub const GENESIS_BITS: u32 = 0x207f_ffff;

const MANTISSA_MASK: u32 = 0x00ff_ffff;

/// Expand compact bits into the full 256-bit target
pub fn compact_to_target(bits: u32) -> BigUint {
    let exponent = bits >> 24;
    let mantissa = BigUint::from(bits & MANTISSA_MASK);

    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent) as usize)
    } else {
        mantissa << (8 * (exponent - 3) as usize)
    }
}

/// Compress a target into compact bits
///
/// Only the three most significant bytes survive, so this is lossy:
/// `compact_to_target(target_to_compact(t)) == t` holds for targets that
/// already came out of `compact_to_target`, not for arbitrary integers.
pub fn target_to_compact(target: &BigUint) -> u32 {
    let bytes = target.to_bytes_be();
    if bytes == [0] {
        return 0;
    }

    let size = bytes.len();
    let mantissa = if size <= 3 {
        let mut value = 0u32;
        for byte in &bytes {
            value = (value << 8) | u32::from(*byte);
        }
        value << (8 * (3 - size))
    } else {
        (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
    };

    ((size as u32) << 24) | (mantissa & MANTISSA_MASK)
}

/// Scale a target by observed versus expected elapsed time
///
/// Blocks arriving faster than expected shrink the target (harder), slower
/// blocks grow it. No clamping is applied.
pub fn retarget(old_target: &BigUint, actual_elapsed: u64, expected_elapsed: u64) -> BigUint {
    if expected_elapsed == 0 {
        return old_target.clone();
    }
    old_target * BigUint::from(actual_elapsed) / BigUint::from(expected_elapsed)
}

/// Check whether a hash satisfies a target
pub fn meets_target(hash: &Hash, target: &BigUint) -> bool {
    BigUint::from_bytes_be(hash.as_bytes()) < *target
}
