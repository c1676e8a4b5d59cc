//! Jitter added on top of backoff delays so that retrying clients do not line up.
//!
//! - `None`: deterministic delays, for tests or tightly controlled workflows.
//! - `Additive`: adds a uniform random delay in `[0, max)` to the backoff.
//!
//! RNG: `rand`'s thread-local RNG by default; inject a seeded RNG through
//! [`Jitter::apply_with_rng`] for reproducible tests.

use rand::{rng, Rng};
use std::time::Duration;

/// Upper bound of the additive jitter used by the default retry configuration.
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_millis(1000);

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the backoff delay unchanged.
    None,
    /// Add a uniform random delay in `[0, max)`.
    Additive { max: Duration },
}

impl Jitter {
    /// Additive jitter up to one second.
    pub fn additive() -> Self {
        Jitter::Additive { max: DEFAULT_JITTER_MAX }
    }

    /// Additive jitter with a custom upper bound.
    pub fn additive_up_to(max: Duration) -> Self {
        Jitter::Additive { max }
    }

    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Additive { max } => {
                let max_millis: u64 = max.as_millis().try_into().unwrap_or(u64::MAX);
                if max_millis == 0 {
                    return delay;
                }
                let extra = rng.random_range(0..max_millis);
                delay.saturating_add(Duration::from_millis(extra))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let delay = Duration::from_secs(4);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    #[test]
    fn additive_jitter_stays_within_one_second() {
        let jitter = Jitter::additive();
        let delay = Duration::from_secs(2);
        for _ in 0..200 {
            let jittered = jitter.apply(delay);
            assert!(jittered >= delay);
            assert!(jittered < delay + Duration::from_secs(1));
        }
    }

    #[test]
    fn additive_jitter_is_reproducible_with_seeded_rng() {
        let jitter = Jitter::additive();
        let delay = Duration::from_secs(8);
        let first = jitter.apply_with_rng(delay, &mut StdRng::seed_from_u64(7));
        let second = jitter.apply_with_rng(delay, &mut StdRng::seed_from_u64(7));
        assert_eq!(first, second);
    }

    #[test]
    fn zero_bound_leaves_delay_alone() {
        let jitter = Jitter::additive_up_to(Duration::ZERO);
        assert_eq!(jitter.apply(Duration::from_millis(30)), Duration::from_millis(30));
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let jitter = Jitter::additive();
        let mut rng = StdRng::seed_from_u64(999);
        let jittered = jitter.apply_with_rng(Duration::MAX, &mut rng);
        assert_eq!(jittered, Duration::MAX);
    }
}
