//! Bounded retry with fixed backoff.
//!
//! Retry control flow is an explicit loop over an enumerated attempt outcome,
//! keeping error classification separate from the loop itself. Only errors
//! classified as transient (busy, sequence) are retried; everything else
//! escalates immediately.

use crate::config::ModelConfig;
use crate::error::{CamResult, CameraError};
use std::time::Duration;
use tokio::time::sleep;

/// Defines a policy for retrying a transient device failure.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The maximum number of attempts (first try included).
    pub max_attempts: u32,
    /// The fixed delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Policy from the per-model configuration knobs.
    pub fn from_config(cfg: &ModelConfig) -> Self {
        Self {
            max_attempts: cfg.retry_attempts.max(1),
            backoff_delay: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// Terminal outcome of a single attempt.
pub enum Attempt<T> {
    /// The call succeeded.
    Success(T),
    /// Transient failure; the loop may try again.
    Retryable(CameraError),
    /// Non-transient failure; escalate immediately.
    Fatal(CameraError),
}

impl<T> Attempt<T> {
    /// Classify a call result: busy errors are retryable, the rest fatal.
    pub fn from_result(result: CamResult<T>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(err @ CameraError::Busy { .. }) => Attempt::Retryable(err),
            Err(err) => Attempt::Fatal(err),
        }
    }
}

/// Run `attempt` up to `policy.max_attempts` times with fixed backoff.
///
/// The returned busy error carries the total attempt count when retries are
/// exhausted.
pub async fn run_with_retry<T>(
    operation: &'static str,
    policy: &RetryPolicy,
    mut attempt: impl FnMut() -> Attempt<T>,
) -> CamResult<T> {
    let mut last_retryable = None;
    for n in 1..=policy.max_attempts {
        match attempt() {
            Attempt::Success(value) => return Ok(value),
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retryable(err) => {
                log::debug!(
                    "{} busy (attempt {}/{}), backing off {:?}",
                    operation,
                    n,
                    policy.max_attempts,
                    policy.backoff_delay
                );
                last_retryable = Some(err);
                if n < policy.max_attempts {
                    sleep(policy.backoff_delay).await;
                }
            }
        }
    }
    Err(match last_retryable {
        Some(CameraError::Busy {
            operation, record, ..
        }) => CameraError::Busy {
            operation,
            attempts: policy.max_attempts,
            record,
        },
        Some(err) => err,
        // max_attempts >= 1, so at least one attempt ran.
        None => CameraError::Busy {
            operation,
            attempts: 0,
            record: crate::error::ErrorRecord {
                result: 0,
                api_code: 0,
                error_code: 0,
            },
        },
    })
}
