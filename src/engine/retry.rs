//! engine::retry
//!
//! Exponential backoff for transient failures.
//!
//! Only operations whose error the caller classifies as retryable are
//! repeated; anything else is returned immediately. Delays start at
//! `backoff`, double after every failed attempt and never exceed
//! `backoff_max`.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::core::config::resolve::SyncPolicy;

/// Iterator over the delays between attempts.
///
/// # Example
///
/// ```
/// use igrelease::engine::retry::Backoff;
/// use std::time::Duration;
///
/// let delays: Vec<_> = Backoff::new(Duration::from_millis(100), Duration::from_millis(250))
///     .take(4)
///     .collect();
/// assert_eq!(delays, [100, 200, 250, 250].map(Duration::from_millis));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// Run `op` up to `policy.attempts` times.
///
/// `op` receives the 1-based attempt number. Between attempts the task
/// sleeps for the next [`Backoff`] delay.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &SyncPolicy,
    what: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delays = Backoff::new(policy.backoff, policy.backoff_max);
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                let delay = delays.next().unwrap_or(policy.backoff_max);
                warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
