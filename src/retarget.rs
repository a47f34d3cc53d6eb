//! Difficulty retarget arithmetic.
//!
//! New target = old target * actual timespan / expected timespan, with the
//! timespan clamped to a factor of 4 either way and the result capped at
//! the network's proof-of-work limit. The result is compared in compact
//! form, which truncates exactly as header `bits` do.
use bitcoin::{params::Params, pow::CompactTarget, Target};
use primitive_types::{U256, U512};

/// Headers per difficulty period.
pub const PERIOD_LENGTH: u32 = 2016;

/// Allowed adjustment factor in either direction.
const MAX_ADJUSTMENT: u64 = 4;

/// Height of the first header of the period containing `height`.
pub fn period_start_height(height: u32) -> u32 {
    height - height % PERIOD_LENGTH
}

/// Whether `height` closes a difficulty period.
pub fn is_period_end(height: u32) -> bool {
    height % PERIOD_LENGTH == PERIOD_LENGTH - 1
}

/// Full-precision target for the period after one that ran from
/// `start_time` to `end_time` under `target`.
pub fn next_target(target: Target, start_time: u32, end_time: u32, params: &Params) -> Target {
    let expected = params.pow_target_timespan;
    let actual = u64::from(end_time.saturating_sub(start_time))
        .clamp(expected / MAX_ADJUSTMENT, expected * MAX_ADJUSTMENT);

    let old = U256::from_little_endian(&target.to_le_bytes());
    // Regtest targets sit just below 2^255; widen before scaling.
    let scaled = old.full_mul(U256::from(actual)) / U512::from(expected);

    let limit = U256::from_little_endian(&params.max_attainable_target.to_le_bytes());
    let new = U256::try_from(scaled).map_or(limit, |t| t.min(limit));
    let mut out = [0u8; 32];
    new.to_little_endian(&mut out);
    Target::from_le_bytes(out)
}

/// Compact encoding a correctly retargeted header must carry.
pub fn expected_bits(target: Target, start_time: u32, end_time: u32, params: &Params) -> CompactTarget {
    next_target(target, start_time, end_time, params).to_compact_lossy()
}
