//! Stability Waiter
//!
//! Bounded polling for operations that converge within the invocation's
//! time budget. A timeout is a `false` return, never an error.

use std::future::Future;
use std::time::Duration;

/// Interval between stability polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Number of polls that fit in `timeout`, at least one
pub fn attempt_budget(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let attempts = timeout.as_nanos() / interval.as_nanos();
    attempts.clamp(1, u32::MAX as u128) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct StabilityWaiter {
    interval: Duration,
    timeout: Duration,
}

impl StabilityWaiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn attempts(&self) -> u32 {
        attempt_budget(self.timeout, self.interval)
    }

    /// Poll `check` until it reports stable or the attempt budget runs out.
    ///
    /// Check errors count as "not yet stable".
    pub async fn wait<F, Fut>(&self, label: &str, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<bool>>,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            match check().await {
                Ok(true) => {
                    tracing::debug!("{} stable after {} poll(s)", label, attempt);
                    return true;
                }
                Ok(false) => {
                    tracing::debug!("{} not stable yet ({}/{})", label, attempt, attempts);
                }
                Err(e) => {
                    tracing::warn!("{} stability poll {} failed: {:#}", label, attempt, e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        tracing::warn!(
            "{} did not stabilize within {}s",
            label,
            self.timeout.as_secs()
        );
        false
    }
}
