//! Reusable retry policy.
//!
//! The policy is a plain value applied at call-sites, not a framework
//! concern. Each external call wraps its own retry loop consulting the
//! policy; only errors classified transient are re-attempted.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{CodedocError, CodedocResult};

/// Exponential backoff parameters with a total time budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Factor applied to the delay after each attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Total time allowed across all attempts.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            multiplier: 2.0,
            cap: Duration::from_secs(60),
            budget: Duration::from_secs(1_800),
        }
    }
}

impl RetryPolicy {
    /// The delay before retry number `attempt` (0-based), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }
}

/// Run `op` under `policy`, retrying transient failures with backoff.
///
/// `on_wait` is invoked before each backoff sleep with the error that
/// triggered it; the ingestion workflow uses this hook to flip a codebase
/// to `queued` while awaiting a rate-limited provider.
///
/// On budget exhaustion, returns `RetryBudgetExhausted` carrying the
/// activity name and the last observed error.
pub async fn run_with_retry<T, F, Fut, W>(
    activity: &str,
    policy: &RetryPolicy,
    mut op: F,
    mut on_wait: W,
) -> CodedocResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CodedocResult<T>>,
    W: FnMut(&CodedocError),
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                let delay = policy.delay_for(attempt);
                if started.elapsed() + delay > policy.budget {
                    tracing::warn!(
                        activity,
                        attempts = attempt + 1,
                        error = %e,
                        "retry budget exhausted"
                    );
                    return Err(CodedocError::RetryBudgetExhausted {
                        activity: activity.to_string(),
                        last_error: e.to_string(),
                    });
                }
                tracing::debug!(
                    activity,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                on_wait(&e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
