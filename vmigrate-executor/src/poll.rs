//! Bounded polling.
//!
//! Readiness waits, phase waits and deletion waits all go through
//! [`Poller::until`]. Time is read from tokio's clock, so tests running with
//! a paused runtime advance deterministically.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Why a poll stopped without a value.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// The deadline elapsed before the sampler produced a value.
    #[error("deadline of {waited:?} exceeded after {samples} samples")]
    DeadlineExceeded { waited: Duration, samples: u32 },

    /// The sampler itself failed; polling stops at the first error.
    #[error("sample failed: {0}")]
    Sample(E),
}

/// Fixed-interval sampler with an overall deadline.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    deadline: Duration,
}

impl Poller {
    #[must_use]
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Call `sample` until it yields `Some`, fails, or the deadline passes.
    ///
    /// `sample` always runs at least once, even with a zero deadline. Between
    /// samples the task sleeps for the interval or the remaining time,
    /// whichever is shorter. A deadline only stops local waiting; nothing is
    /// cancelled remotely.
    ///
    /// # Errors
    /// Returns [`PollError::DeadlineExceeded`] when time runs out and
    /// [`PollError::Sample`] when `sample` returns an error.
    pub async fn until<T, E, F, Fut>(&self, mut sample: F) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let start = Instant::now();
        let mut samples: u32 = 0;
        loop {
            samples = samples.saturating_add(1);
            if let Some(value) = sample().await.map_err(PollError::Sample)? {
                return Ok(value);
            }
            let waited = start.elapsed();
            let Some(remaining) = self.deadline.checked_sub(waited).filter(|r| !r.is_zero()) else {
                return Err(PollError::DeadlineExceeded { waited, samples });
            };
            tracing::debug!(sample = samples, waited_ms = waited.as_millis(), "condition not met yet");
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
