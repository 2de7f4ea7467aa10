//! Property tests for the recovery policy engine.
//!
//! Invariants tested:
//! - factor = 1 degenerates every exponential policy to a constant sequence
//! - configured maxima clamp every element of every sequence
//! - fast-first policies always start at zero
//! - constructors reject factor < 1 and max < initial
//! - sequences are pure: two generators yield identical delays

use std::time::Duration;

use proptest::prelude::*;

use artemis_client::{
    ConstantBackoff, DecorrelatedJitterBackoff, ExponentialBackoff, LinearBackoff, RecoveryPolicy,
};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: exponential with factor = 1 is constant.
    #[test]
    fn exponential_factor_one_is_constant(
        initial_ms in 1u64..=10_000,
        fast_first in any::<bool>(),
    ) {
        let policy: RecoveryPolicy = ExponentialBackoff::new(ms(initial_ms), None, 1.0)
            .unwrap()
            .with_fast_first(fast_first)
            .into();
        let delays: Vec<_> = policy.delays().take(16).collect();
        for (i, delay) in delays.iter().enumerate() {
            if fast_first && i == 0 {
                prop_assert_eq!(*delay, Duration::ZERO);
            } else {
                prop_assert_eq!(*delay, ms(initial_ms));
            }
        }
    }

    /// Property: every element respects the configured maximum.
    #[test]
    fn exponential_never_exceeds_max(
        initial_ms in 1u64..=1_000,
        extra_ms in 0u64..=10_000,
        factor in 1.0f64..=8.0,
    ) {
        let max = ms(initial_ms + extra_ms);
        let policy: RecoveryPolicy =
            ExponentialBackoff::new(ms(initial_ms), Some(max), factor)
                .unwrap()
                .into();
        prop_assert!(policy.delays().take(64).all(|d| d <= max));
    }

    /// Property: linear sequences are clamped the same way.
    #[test]
    fn linear_never_exceeds_max(
        initial_ms in 1u64..=1_000,
        extra_ms in 0u64..=10_000,
        factor in 1.0f64..=8.0,
    ) {
        let max = ms(initial_ms + extra_ms);
        let policy: RecoveryPolicy = LinearBackoff::new(ms(initial_ms), Some(max), factor)
            .unwrap()
            .into();
        prop_assert!(policy.delays().take(64).all(|d| d <= max));
    }

    /// Property: jitter draws stay inside [initial, max] after the first
    /// element, which equals initial.
    #[test]
    fn jitter_stays_in_bounds(
        initial_ms in 1u64..=1_000,
        extra_ms in 0u64..=10_000,
        seed in any::<u64>(),
    ) {
        let initial = ms(initial_ms);
        let max = ms(initial_ms + extra_ms);
        let policy: RecoveryPolicy = DecorrelatedJitterBackoff::new(initial, max)
            .unwrap()
            .with_seed(seed)
            .into();
        let delays: Vec<_> = policy.delays().take(32).collect();
        prop_assert_eq!(delays[0], initial);
        prop_assert!(delays.iter().all(|d| *d >= initial && *d <= max));
    }

    /// Property: fast-first means an immediate first retry, regardless of
    /// variant.
    #[test]
    fn fast_first_starts_at_zero(
        delay_ms in 1u64..=10_000,
        factor in 1.0f64..=8.0,
        seed in any::<u64>(),
    ) {
        let variants: Vec<RecoveryPolicy> = vec![
            ConstantBackoff::new(ms(delay_ms)).with_fast_first(true).into(),
            LinearBackoff::new(ms(delay_ms), None, factor)
                .unwrap()
                .with_fast_first(true)
                .into(),
            ExponentialBackoff::new(ms(delay_ms), None, factor)
                .unwrap()
                .with_fast_first(true)
                .into(),
            DecorrelatedJitterBackoff::new(ms(delay_ms), ms(delay_ms * 10))
                .unwrap()
                .with_fast_first(true)
                .with_seed(seed)
                .into(),
        ];
        for policy in variants {
            prop_assert_eq!(policy.delay(0), Some(Duration::ZERO));
        }
    }

    /// Property: construction rejects factor < 1.
    #[test]
    fn construction_rejects_small_factors(
        initial_ms in 0u64..=10_000,
        factor in 0.0f64..1.0,
    ) {
        prop_assert!(ExponentialBackoff::new(ms(initial_ms), None, factor).is_err());
        prop_assert!(LinearBackoff::new(ms(initial_ms), None, factor).is_err());
    }

    /// Property: construction rejects max < initial.
    #[test]
    fn construction_rejects_inverted_bounds(
        max_ms in 0u64..1_000,
        gap_ms in 1u64..=1_000,
        factor in 1.0f64..=8.0,
    ) {
        let initial = ms(max_ms + gap_ms);
        let max = ms(max_ms);
        prop_assert!(ExponentialBackoff::new(initial, Some(max), factor).is_err());
        prop_assert!(LinearBackoff::new(initial, Some(max), factor).is_err());
        prop_assert!(DecorrelatedJitterBackoff::new(initial, max).is_err());
    }

    /// Property: the retry budget bounds the sequence length exactly.
    #[test]
    fn retry_count_bounds_length(
        delay_ms in 1u64..=1_000,
        retry_count in 0u32..=64,
    ) {
        let policy: RecoveryPolicy = ConstantBackoff::new(ms(delay_ms))
            .with_retry_count(retry_count)
            .into();
        prop_assert_eq!(policy.delays().count(), retry_count as usize);
        prop_assert_eq!(policy.delay(retry_count), None);
    }

    /// Property: generators are pure; two invocations agree element-wise,
    /// including the seeded jitter variant.
    #[test]
    fn sequences_are_pure(
        initial_ms in 1u64..=1_000,
        factor in 1.0f64..=8.0,
        seed in any::<u64>(),
    ) {
        let policies: Vec<RecoveryPolicy> = vec![
            ExponentialBackoff::new(ms(initial_ms), Some(ms(initial_ms * 100)), factor)
                .unwrap()
                .into(),
            DecorrelatedJitterBackoff::new(ms(initial_ms), ms(initial_ms * 100))
                .unwrap()
                .with_seed(seed)
                .into(),
        ];
        for policy in policies {
            let a: Vec<_> = policy.delays().take(32).collect();
            let b: Vec<_> = policy.delays().take(32).collect();
            prop_assert_eq!(a, b);
        }
    }
}
