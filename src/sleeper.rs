//! Abstraction over waiting between retry attempts.
//!
//! Production code sleeps on the tokio timer; tests swap in [`InstantSleeper`] or
//! [`TrackingSleeper`] to observe the retry schedule without waiting for it.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Something that can wait for a duration.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer (honors paused test time).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// Returns immediately and records every requested delay.
///
/// Clones share the same record, so a test can keep one handle and give another to the policy.
#[derive(Debug, Clone, Default)]
pub struct TrackingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl TrackingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().clone()
    }

    /// Offsets (from the first attempt) at which each attempt would have started.
    pub fn attempt_offsets(&self) -> Vec<Duration> {
        let mut at = Duration::ZERO;
        let mut offsets = vec![at];
        for delay in self.calls.lock().iter() {
            at += *delay;
            offsets.push(at);
        }
        offsets
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl Sleeper for TrackingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.calls.lock().push(duration);
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instant_sleeper_doesnt_sleep() {
        let start = std::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(10)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn tracking_sleeper_records_calls_and_offsets() {
        let sleeper = TrackingSleeper::new();
        sleeper.sleep(Duration::from_secs(2)).await;
        sleeper.sleep(Duration::from_secs(4)).await;
        sleeper.sleep(Duration::from_secs(8)).await;

        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)]
        );
        assert_eq!(
            sleeper.attempt_offsets(),
            vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(6),
                Duration::from_secs(14)
            ]
        );

        sleeper.clear();
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_timer() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(3)).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
