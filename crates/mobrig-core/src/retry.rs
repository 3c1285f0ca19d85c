//! Fixed-interval polling with a hard attempt cap and cancellation.
//!
//! [`poll_until`] waits an initial delay, then probes at a fixed interval until
//! the probe reports [`Poll::Ready`], the probe fails, the attempt budget runs
//! out, or the caller cancels through a [`CancellationToken`].
//!
//! Timing uses `tokio::time`, so tests can run against a paused clock.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use mobrig_core::retry::{poll_until, Poll, PollPolicy};
//!
//! # async fn example() {
//! let policy = PollPolicy {
//!     initial_delay: Duration::ZERO,
//!     interval: Duration::from_millis(100),
//!     max_attempts: 5,
//! };
//! let cancel = CancellationToken::new();
//! let result = poll_until(&policy, &cancel, |attempt| async move {
//!     Ok::<_, std::io::Error>(if attempt == 3 { Poll::Ready(attempt) } else { Poll::Pending })
//! })
//! .await;
//! assert_eq!(result.unwrap(), 3);
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Timing and budget for [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before the first interval starts.
    pub initial_delay: Duration,
    /// Wait before each probe.
    pub interval: Duration,
    /// Number of probes before giving up.
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Boot-completion polling: 10 s initial delay, then every 3 s, 20 attempts.
    pub fn boot() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(3),
            max_attempts: 20,
        }
    }

    /// Upper bound on the time a poll can take before timing out.
    pub fn total_budget(&self) -> Duration {
        self.initial_delay + self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::boot()
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Why polling stopped without a result.
#[derive(Error, Debug)]
pub enum PollError<E> {
    /// Every attempt reported [`Poll::Pending`].
    #[error("gave up after {attempts} attempts")]
    TimedOut { attempts: u32 },

    /// The cancellation token fired.
    #[error("polling cancelled")]
    Cancelled,

    /// A probe failed; polling stops on the first failure.
    #[error(transparent)]
    Probe(E),
}

/// Polls `probe` according to `policy`.
///
/// `probe` receives the 1-based attempt number.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    wait(policy.initial_delay, cancel).await?;

    for attempt in 1..=policy.max_attempts {
        wait(policy.interval, cancel).await?;
        trace!(attempt, "probing");
        match probe(attempt).await.map_err(PollError::Probe)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending => {}
        }
    }

    Err(PollError::TimedOut {
        attempts: policy.max_attempts,
    })
}

async fn wait<E>(duration: Duration, cancel: &CancellationToken) -> Result<(), PollError<E>> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
