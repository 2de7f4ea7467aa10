//! Recovery policies driving reconnection cadence.
//!
//! When a connection fails, rather than immediately retrying (which can
//! overwhelm a recovering broker), the supervisor waits between attempts
//! according to a [`RecoveryPolicy`]. A policy is a pure description: it
//! yields a deterministic, lazily generated sequence of delays bounded by an
//! optional retry budget. Two sequences obtained from the same policy are
//! identical, which is what makes recovery behavior testable; the jitter
//! variant fixes its random seed at construction time.
//!
//! # Variants
//!
//! - [`ConstantBackoff`]: the same delay every attempt.
//! - [`LinearBackoff`]: `initial * (1 + factor * i)`, optionally clamped.
//! - [`ExponentialBackoff`]: `initial * factor^i`, optionally clamped.
//! - [`DecorrelatedJitterBackoff`]: `uniform(initial, min(max, previous * 3))`,
//!   the decorrelated-jitter scheme that spreads reconnect storms across a
//!   fleet of clients.
//!
//! # Fast-first
//!
//! With `fast_first` enabled the first delay is zero, so the first retry is
//! immediate; the rest of the sequence shifts by one, meaning the first
//! non-zero delay pays `initial` rather than `initial * factor`.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use artemis_client::policy::{ExponentialBackoff, RecoveryPolicy};
//!
//! let policy: RecoveryPolicy = ExponentialBackoff::new(
//!     Duration::from_millis(10),
//!     Some(Duration::from_millis(250)),
//!     3.0,
//! )
//! .unwrap()
//! .into();
//!
//! let delays: Vec<_> = policy.delays().take(5).collect();
//! assert_eq!(delays[3], Duration::from_millis(250)); // clamped
//! ```

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ClientError;

/// Scales a duration by a non-negative factor, saturating instead of
/// panicking when the result exceeds what `Duration` can represent.
fn scale(d: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

fn validate_factor(factor: f64) -> Result<(), ClientError> {
    if !factor.is_finite() || factor < 1.0 {
        return Err(ClientError::configuration(format!(
            "factor must be >= 1 (factor = {factor})"
        )));
    }
    Ok(())
}

fn validate_max(initial: Duration, max: Option<Duration>) -> Result<(), ClientError> {
    if let Some(max) = max {
        if max < initial {
            return Err(ClientError::configuration(format!(
                "max_delay must be >= initial_delay (max_delay = {max:?}, initial_delay = {initial:?})"
            )));
        }
    }
    Ok(())
}

/// Emits the same delay for every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantBackoff {
    delay: Duration,
    retry_count: Option<u32>,
    fast_first: bool,
}

impl ConstantBackoff {
    /// Creates a constant policy with an unbounded retry budget.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            retry_count: None,
            fast_first: false,
        }
    }

    /// Bounds the number of retries.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Makes the first retry immediate.
    pub fn with_fast_first(mut self, fast_first: bool) -> Self {
        self.fast_first = fast_first;
        self
    }
}

/// Delay grows linearly: `initial * (1 + factor * attempt)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearBackoff {
    initial: Duration,
    max: Option<Duration>,
    factor: f64,
    retry_count: Option<u32>,
    fast_first: bool,
}

impl LinearBackoff {
    /// Creates a linear policy with an unbounded retry budget.
    ///
    /// # Errors
    /// `Configuration` when `factor < 1` or `max < initial`.
    pub fn new(
        initial: Duration,
        max: Option<Duration>,
        factor: f64,
    ) -> Result<Self, ClientError> {
        validate_factor(factor)?;
        validate_max(initial, max)?;
        Ok(Self {
            initial,
            max,
            factor,
            retry_count: None,
            fast_first: false,
        })
    }

    /// Bounds the number of retries.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Makes the first retry immediate.
    pub fn with_fast_first(mut self, fast_first: bool) -> Self {
        self.fast_first = fast_first;
        self
    }
}

/// Delay grows geometrically: `initial * factor^attempt`.
///
/// `factor = 1` degenerates to a constant sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Option<Duration>,
    factor: f64,
    retry_count: Option<u32>,
    fast_first: bool,
}

impl ExponentialBackoff {
    /// Creates an exponential policy with an unbounded retry budget.
    ///
    /// # Errors
    /// `Configuration` when `factor < 1` or `max < initial`.
    pub fn new(
        initial: Duration,
        max: Option<Duration>,
        factor: f64,
    ) -> Result<Self, ClientError> {
        validate_factor(factor)?;
        validate_max(initial, max)?;
        Ok(Self {
            initial,
            max,
            factor,
            retry_count: None,
            fast_first: false,
        })
    }

    /// Bounds the number of retries.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Makes the first retry immediate. Subsequent delays shift by one, so
    /// the first non-zero delay is `initial`, not `initial * factor`.
    pub fn with_fast_first(mut self, fast_first: bool) -> Self {
        self.fast_first = fast_first;
        self
    }
}

/// Decorrelated jitter: each delay is drawn uniformly from
/// `[initial, min(max, previous * 3)]`.
///
/// The seed is fixed when the policy is built, so the sequence is
/// reproducible; tests inject a known seed via [`with_seed`].
///
/// [`with_seed`]: DecorrelatedJitterBackoff::with_seed
#[derive(Debug, Clone, PartialEq)]
pub struct DecorrelatedJitterBackoff {
    initial: Duration,
    max: Duration,
    retry_count: Option<u32>,
    fast_first: bool,
    seed: u64,
}

impl DecorrelatedJitterBackoff {
    /// Creates a jitter policy with an unbounded retry budget and a random
    /// seed captured now.
    ///
    /// # Errors
    /// `Configuration` when `max < initial`.
    pub fn new(initial: Duration, max: Duration) -> Result<Self, ClientError> {
        validate_max(initial, Some(max))?;
        Ok(Self {
            initial,
            max,
            retry_count: None,
            fast_first: false,
            seed: rand::random(),
        })
    }

    /// Bounds the number of retries.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Makes the first retry immediate.
    pub fn with_fast_first(mut self, fast_first: bool) -> Self {
        self.fast_first = fast_first;
        self
    }

    /// Fixes the random seed so tests can assert exact sequences.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// A reconnection delay policy, one of the four supported strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryPolicy {
    /// Same delay every attempt.
    Constant(ConstantBackoff),
    /// Linearly growing delay.
    Linear(LinearBackoff),
    /// Geometrically growing delay.
    Exponential(ExponentialBackoff),
    /// Randomized decorrelated jitter.
    DecorrelatedJitter(DecorrelatedJitterBackoff),
}

impl RecoveryPolicy {
    /// The retry budget; `None` means retry forever (the default for every
    /// variant).
    pub fn retry_count(&self) -> Option<u32> {
        match self {
            RecoveryPolicy::Constant(p) => p.retry_count,
            RecoveryPolicy::Linear(p) => p.retry_count,
            RecoveryPolicy::Exponential(p) => p.retry_count,
            RecoveryPolicy::DecorrelatedJitter(p) => p.retry_count,
        }
    }

    /// Whether the first retry is immediate.
    pub fn fast_first(&self) -> bool {
        match self {
            RecoveryPolicy::Constant(p) => p.fast_first,
            RecoveryPolicy::Linear(p) => p.fast_first,
            RecoveryPolicy::Exponential(p) => p.fast_first,
            RecoveryPolicy::DecorrelatedJitter(p) => p.fast_first,
        }
    }

    /// The lazy delay sequence, bounded by the retry budget.
    ///
    /// Pure: every call yields an identical sequence.
    pub fn delays(&self) -> DelaySequence {
        let kind = match self {
            RecoveryPolicy::Constant(p) => SequenceKind::Constant {
                delay: p.delay,
                fast_first: p.fast_first,
            },
            RecoveryPolicy::Linear(p) => SequenceKind::Linear {
                initial: p.initial,
                max: p.max,
                factor: p.factor,
                fast_first: p.fast_first,
            },
            RecoveryPolicy::Exponential(p) => SequenceKind::Exponential {
                max: p.max,
                factor: p.factor,
                fast_first: p.fast_first,
                current: p.initial,
            },
            RecoveryPolicy::DecorrelatedJitter(p) => SequenceKind::Jitter {
                initial: p.initial,
                max: p.max,
                fast_first: p.fast_first,
                previous: p.initial,
                rng: StdRng::seed_from_u64(p.seed),
            },
        };
        DelaySequence {
            remaining: self.retry_count(),
            attempt: 0,
            kind,
        }
    }

    /// Random access into the delay sequence: `None` past the retry budget.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        self.delays().nth(attempt as usize)
    }
}

impl Default for RecoveryPolicy {
    /// Exponential backoff from 1 second, doubling, capped at 60 seconds,
    /// retried forever.
    fn default() -> Self {
        RecoveryPolicy::Exponential(
            ExponentialBackoff::new(Duration::from_secs(1), Some(Duration::from_secs(60)), 2.0)
                .expect("default policy parameters are valid"),
        )
    }
}

impl From<ConstantBackoff> for RecoveryPolicy {
    fn from(p: ConstantBackoff) -> Self {
        RecoveryPolicy::Constant(p)
    }
}

impl From<LinearBackoff> for RecoveryPolicy {
    fn from(p: LinearBackoff) -> Self {
        RecoveryPolicy::Linear(p)
    }
}

impl From<ExponentialBackoff> for RecoveryPolicy {
    fn from(p: ExponentialBackoff) -> Self {
        RecoveryPolicy::Exponential(p)
    }
}

impl From<DecorrelatedJitterBackoff> for RecoveryPolicy {
    fn from(p: DecorrelatedJitterBackoff) -> Self {
        RecoveryPolicy::DecorrelatedJitter(p)
    }
}

/// Lazy iterator over a policy's delays. Obtained via
/// [`RecoveryPolicy::delays`].
#[derive(Debug, Clone)]
pub struct DelaySequence {
    remaining: Option<u32>,
    attempt: u64,
    kind: SequenceKind,
}

#[derive(Debug, Clone)]
enum SequenceKind {
    Constant {
        delay: Duration,
        fast_first: bool,
    },
    Linear {
        initial: Duration,
        max: Option<Duration>,
        factor: f64,
        fast_first: bool,
    },
    Exponential {
        max: Option<Duration>,
        factor: f64,
        fast_first: bool,
        // The next non-zero delay; advanced geometrically as the sequence
        // is consumed, clamped at `max`.
        current: Duration,
    },
    Jitter {
        initial: Duration,
        max: Duration,
        fast_first: bool,
        previous: Duration,
        rng: StdRng,
    },
}

impl Iterator for DelaySequence {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let attempt = self.attempt;
        self.attempt += 1;

        let delay = match &mut self.kind {
            SequenceKind::Constant { delay, fast_first } => {
                if *fast_first && attempt == 0 {
                    Duration::ZERO
                } else {
                    *delay
                }
            }
            SequenceKind::Linear {
                initial,
                max,
                factor,
                fast_first,
            } => {
                if *fast_first && attempt == 0 {
                    Duration::ZERO
                } else {
                    // With fast-first, attempt 1 pays the attempt-0 delay.
                    let index = if *fast_first { attempt - 1 } else { attempt };
                    let delay = scale(*initial, 1.0 + *factor * index as f64);
                    match max {
                        Some(max) => delay.min(*max),
                        None => delay,
                    }
                }
            }
            SequenceKind::Exponential {
                max,
                factor,
                fast_first,
                current,
            } => {
                if *fast_first && attempt == 0 {
                    Duration::ZERO
                } else {
                    let delay = *current;
                    let mut next = scale(*current, *factor);
                    if let Some(max) = max {
                        next = next.min(*max);
                    }
                    *current = next;
                    delay
                }
            }
            SequenceKind::Jitter {
                initial,
                max,
                fast_first,
                previous,
                rng,
            } => {
                if attempt == 0 {
                    if *fast_first {
                        Duration::ZERO
                    } else {
                        *initial
                    }
                } else {
                    let upper = previous.saturating_mul(3).min(*max).max(*initial);
                    let delay = rng.gen_range(*initial..=upper);
                    *previous = delay;
                    delay
                }
            }
        };
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn first_five(policy: &RecoveryPolicy) -> Vec<Duration> {
        policy.delays().take(5).collect()
    }

    #[test]
    fn exponential_doubling_table() {
        let policy: RecoveryPolicy = ExponentialBackoff::new(ms(10), None, 2.0).unwrap().into();
        assert_eq!(
            first_five(&policy),
            vec![ms(10), ms(20), ms(40), ms(80), ms(160)]
        );
    }

    #[test]
    fn exponential_tripling_table() {
        let policy: RecoveryPolicy = ExponentialBackoff::new(ms(10), None, 3.0).unwrap().into();
        assert_eq!(
            first_five(&policy),
            vec![ms(10), ms(30), ms(90), ms(270), ms(810)]
        );
    }

    #[test]
    fn exponential_clamped_by_max() {
        let policy: RecoveryPolicy = ExponentialBackoff::new(ms(10), Some(ms(250)), 3.0)
            .unwrap()
            .into();
        assert_eq!(
            first_five(&policy),
            vec![ms(10), ms(30), ms(90), ms(250), ms(250)]
        );
    }

    #[test]
    fn exponential_fast_first_shifts_by_one() {
        let policy: RecoveryPolicy = ExponentialBackoff::new(ms(10), None, 2.0)
            .unwrap()
            .with_fast_first(true)
            .into();
        assert_eq!(
            first_five(&policy),
            vec![ms(0), ms(10), ms(20), ms(40), ms(80)]
        );
    }

    #[test]
    fn exponential_factor_one_is_constant() {
        let policy: RecoveryPolicy = ExponentialBackoff::new(ms(42), Some(ms(100)), 1.0)
            .unwrap()
            .into();
        assert!(policy.delays().take(10).all(|d| d == ms(42)));
    }

    #[test]
    fn linear_growth() {
        let policy: RecoveryPolicy = LinearBackoff::new(ms(10), Some(ms(35)), 1.0)
            .unwrap()
            .into();
        assert_eq!(
            first_five(&policy),
            vec![ms(10), ms(20), ms(30), ms(35), ms(35)]
        );
    }

    #[test]
    fn linear_fast_first() {
        let policy: RecoveryPolicy = LinearBackoff::new(ms(10), None, 1.0)
            .unwrap()
            .with_fast_first(true)
            .into();
        assert_eq!(
            first_five(&policy),
            vec![ms(0), ms(10), ms(20), ms(30), ms(40)]
        );
    }

    #[test]
    fn constant_sequence() {
        let policy: RecoveryPolicy = ConstantBackoff::new(ms(100)).into();
        assert!(policy.delays().take(4).all(|d| d == ms(100)));

        let fast: RecoveryPolicy = ConstantBackoff::new(ms(100)).with_fast_first(true).into();
        assert_eq!(fast.delay(0), Some(ms(0)));
        assert_eq!(fast.delay(1), Some(ms(100)));
    }

    #[test]
    fn retry_count_bounds_the_sequence() {
        let policy: RecoveryPolicy = ConstantBackoff::new(ms(5)).with_retry_count(3).into();
        assert_eq!(policy.delays().count(), 3);
        assert_eq!(policy.delay(2), Some(ms(5)));
        assert_eq!(policy.delay(3), None);

        let none: RecoveryPolicy = ConstantBackoff::new(ms(5)).with_retry_count(0).into();
        assert_eq!(none.delays().next(), None);
    }

    #[test]
    fn jitter_is_deterministic_for_a_seed() {
        let policy: RecoveryPolicy = DecorrelatedJitterBackoff::new(ms(10), ms(500))
            .unwrap()
            .with_seed(7)
            .into();
        let a: Vec<_> = policy.delays().take(8).collect();
        let b: Vec<_> = policy.delays().take(8).collect();
        assert_eq!(a, b);
        assert_eq!(a[0], ms(10));
        assert!(a.iter().all(|d| *d >= ms(10) && *d <= ms(500)));
    }

    #[test]
    fn jitter_fast_first_starts_at_zero() {
        let policy: RecoveryPolicy = DecorrelatedJitterBackoff::new(ms(10), ms(500))
            .unwrap()
            .with_fast_first(true)
            .with_seed(7)
            .into();
        let delays: Vec<_> = policy.delays().take(4).collect();
        assert_eq!(delays[0], Duration::ZERO);
        assert!(delays[1..].iter().all(|d| *d >= ms(10)));
    }

    #[test]
    fn construction_rejects_factor_below_one() {
        let err = ExponentialBackoff::new(ms(10), None, 0.5).unwrap_err();
        assert!(err.to_string().contains("factor"));
        assert!(LinearBackoff::new(ms(10), None, 0.0).is_err());
    }

    #[test]
    fn construction_rejects_max_below_initial() {
        let err = ExponentialBackoff::new(ms(100), Some(ms(10)), 2.0).unwrap_err();
        assert!(err.to_string().contains("max_delay"));
        assert!(DecorrelatedJitterBackoff::new(ms(100), ms(10)).is_err());
    }

    #[test]
    fn default_policy_is_unbounded() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.retry_count(), None);
        assert_eq!(policy.delay(0), Some(Duration::from_secs(1)));
    }
}
