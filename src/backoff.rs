//! Backoff strategies for the retry policy.
//!
//! Attempt semantics: attempt index `0` is the initial call (no delay); the first retry is
//! `attempt = 1`. Delays saturate at [`MAX_BACKOFF`] instead of overflowing.
//!
//! ```rust
//! use std::time::Duration;
//! use beststories::Backoff;
//!
//! let backoff = Backoff::power(2);
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_secs(2));
//! assert_eq!(backoff.delay(3), Duration::from_secs(8));
//! ```

use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackoffKind {
    Constant(Duration),
    /// `base^attempt` whole seconds.
    Power(u32),
}

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant(delay) }
    }

    /// `base^attempt` seconds before retry number `attempt`.
    pub fn power(base: u32) -> Self {
        Self { kind: BackoffKind::Power(base) }
    }

    /// Delay before the given attempt (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.kind {
            BackoffKind::Constant(delay) => delay.min(MAX_BACKOFF),
            BackoffKind::Power(base) => {
                let exponent = attempt.min(u32::MAX as usize) as u32;
                let secs = u64::from(base).checked_pow(exponent).unwrap_or(u64::MAX);
                Duration::from_secs(secs.min(MAX_BACKOFF.as_secs()))
            }
        }
    }
}
