//! Reconnect backoff calculation.
//!
//! Provides the portable math for reconnection timing. The actual stateful
//! backoff tracking (attempt counting, the stability-window timer) lives in
//! `docsync-transport`, which has access to tokio; this module contains the
//! sync-only building blocks:
//!
//! - [`reconnect_delay_ms`]: exponential backoff with a ceiling
//! - [`apply_jitter`]: uniform jitter in `[1.0, 1.5)` of the base delay
//!
//! Jitter avoids thundering-herd reconnect synchronization across many
//! clients; the ceiling bounds worst-case reconnect storms.

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default ceiling for the reconnect delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 32_000;
/// Width of the jitter band above the base delay (factor `[1.0, 1.5)`).
pub const JITTER_SPREAD: f64 = 0.5;

/// Calculate the unjittered reconnect delay for a given attempt count.
///
/// Formula: `min(max_delay, base_delay * 2^max(attempts, 1))`.
///
/// The exponent floor of 1 is deliberate: even the first failure yields the
/// minimum two-times-base delay rather than an instant retry, so a server
/// actively rejecting connections never sees a close-then-open hot loop.
#[must_use]
pub fn reconnect_delay_ms(attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempts.max(1).min(31);
    let exponential = base_delay_ms.saturating_mul(1u64 << exponent);
    exponential.min(max_delay_ms)
}

/// Apply uniform jitter to an unjittered delay.
///
/// `random` must be a value in `[0.0, 1.0)` from a PRNG; it maps to a
/// multiplier in `[1.0, 1.5)`. The result truncates toward zero so the
/// upper bound stays exclusive.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn apply_jitter(delay_ms: u64, random: f64) -> u64 {
    let factor = 1.0 + random.clamp(0.0, 1.0) * JITTER_SPREAD;
    ((delay_ms as f64) * factor) as u64
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn delays_double_up_to_ceiling() {
        let delays: Vec<u64> = (1..=6)
            .map(|a| reconnect_delay_ms(a, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS))
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16_000, 32_000, 32_000]);
    }

    #[test]
    fn zero_attempts_hits_the_exponent_floor() {
        // attempts = 0 and attempts = 1 both yield the 2x-base minimum
        assert_eq!(reconnect_delay_ms(0, 1000, 32_000), 2000);
        assert_eq!(reconnect_delay_ms(1, 1000, 32_000), 2000);
    }

    #[test]
    fn high_attempt_count_does_not_overflow() {
        let delay = reconnect_delay_ms(u32::MAX, 1000, 32_000);
        assert_eq!(delay, 32_000);
    }

    #[test]
    fn jitter_at_zero_is_identity() {
        assert_eq!(apply_jitter(2000, 0.0), 2000);
    }

    #[test]
    fn jitter_stays_below_one_and_a_half() {
        // random arbitrarily close to 1.0 must not reach base * 1.5
        let jittered = apply_jitter(2000, 0.999_999_9);
        assert!(jittered < 3000, "jittered delay was {jittered}");
    }

    proptest! {
        #[test]
        fn delay_is_monotonic_in_attempts(a in 0u32..64, b in 0u32..64) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let d_lo = reconnect_delay_ms(lo, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS);
            let d_hi = reconnect_delay_ms(hi, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS);
            prop_assert!(d_lo <= d_hi);
        }

        #[test]
        fn delay_never_exceeds_ceiling(attempts in 0u32..1000) {
            let delay = reconnect_delay_ms(attempts, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS);
            prop_assert!(delay <= DEFAULT_MAX_DELAY_MS);
            prop_assert!(delay >= 2 * DEFAULT_BASE_DELAY_MS);
        }

        #[test]
        fn jitter_stays_in_band(attempts in 0u32..64, random in 0.0f64..1.0) {
            let base = reconnect_delay_ms(attempts, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS);
            let jittered = apply_jitter(base, random);
            prop_assert!(jittered >= base);
            prop_assert!((jittered as f64) < (base as f64) * 1.5);
        }
    }
}
