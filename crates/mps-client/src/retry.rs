//! Retry executor: bounded attempts, exponential backoff with jitter, and a
//! single credential refresh on auth expiry.
//!
//! # Contract
//! - An operation that always fails `Transient` is attempted exactly
//!   `max_attempts` times, then the last error surfaces with `attempts` set.
//! - `Fatal` failures surface on the attempt that produced them.
//! - `AuthExpired` triggers one refresh and one extra attempt. That attempt
//!   does not consume the transient budget. A second `AuthExpired` surfaces.
//! - A server-supplied `Retry-After` replaces the computed backoff when it is
//!   longer.

use std::future::Future;
use std::time::Duration;

use mps_config::RetrySettings;
use mps_schemas::{AuthFailure, SyncError};
use rand::Rng;

use crate::error::{Classification, Failure};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_attempts: s.max_attempts.clamp(1, 10),
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
            multiplier: s.multiplier,
            jitter: s.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    ///
    /// `initial * multiplier^(retry-1)`, capped at `max_backoff`, then
    /// spread by +/-25% when jitter is on.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31) as i32;
        let base_ms = self.initial_backoff.as_millis() as f64 * self.multiplier.max(1.0).powi(exp);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64);

        let ms = if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(-0.25..=0.25);
            (capped_ms * (1.0 + factor)).max(0.0)
        } else {
            capped_ms
        };
        Duration::from_millis(ms as u64)
    }

    fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.backoff(retry);
        match retry_after {
            Some(ra) if ra > computed => ra,
            _ => computed,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Terminal outcome of one logical call.
#[derive(Debug)]
pub struct Outcome<T> {
    pub result: Result<T, SyncError>,
    /// Attempts made, including the auth-refresh retry when one happened.
    pub attempts: u32,
}

impl<T> Outcome<T> {
    pub fn retries_used(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `op` to a terminal outcome.
    ///
    /// `refresh` is invoked at most once, on the first `AuthExpired`.
    pub async fn execute<T, Op, Fut, Rf, RFut>(&self, mut op: Op, mut refresh: Rf) -> Outcome<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
        Rf: FnMut() -> RFut,
        RFut: Future<Output = Result<(), SyncError>>,
    {
        let mut attempts: u32 = 0;
        let mut budget = self.policy.max_attempts.max(1);
        let mut refreshed = false;
        let mut transient_retries: u32 = 0;

        loop {
            attempts += 1;
            let failure = match op(attempts).await {
                Ok(v) => {
                    return Outcome {
                        result: Ok(v),
                        attempts,
                    }
                }
                Err(f) => f,
            };

            match failure.class {
                Classification::Fatal => {
                    return Outcome {
                        result: Err(failure.error.with_attempts(attempts)),
                        attempts,
                    };
                }
                Classification::AuthExpired if !refreshed => {
                    refreshed = true;
                    budget += 1;
                    tracing::info!(attempt = attempts, "session token rejected, refreshing credentials");
                    if let Err(e) = refresh().await {
                        return Outcome {
                            result: Err(e.with_attempts(attempts)),
                            attempts,
                        };
                    }
                }
                Classification::AuthExpired => {
                    return Outcome {
                        result: Err(SyncError::auth(
                            AuthFailure::InvalidCredentials,
                            format!("token rejected again after refresh: {}", failure.error.message),
                        )
                        .with_attempts(attempts)),
                        attempts,
                    };
                }
                Classification::Transient => {
                    if attempts >= budget {
                        tracing::warn!(attempts, error = %failure.error, "retry budget exhausted");
                        return Outcome {
                            result: Err(failure.error.with_attempts(attempts)),
                            attempts,
                        };
                    }
                    transient_retries += 1;
                    let delay = self.policy.delay_for(transient_retries, failure.retry_after);
                    tracing::debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mps_schemas::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
        }
    }

    async fn no_refresh() -> Result<(), SyncError> {
        Ok(())
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = policy(4);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(20), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let p = RetryPolicy {
            jitter: true,
            ..policy(4)
        };
        for _ in 0..200 {
            let d = p.backoff(2).as_millis();
            assert!((150..=250).contains(&d), "got {d}");
        }
    }

    #[test]
    fn retry_after_wins_when_longer() {
        let p = policy(4);
        assert_eq!(p.delay_for(1, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(p.delay_for(3, Some(Duration::from_millis(1))), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_runs_exactly_max_attempts() {
        let calls = &AtomicU32::new(0);
        let exec = RetryExecutor::new(policy(4));
        let out: Outcome<()> = exec
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Failure::transient(SyncError::transient("503")))
                },
                no_refresh,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(out.attempts, 4);
        let err = out.result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientNetwork);
        assert_eq!(err.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_surfaces_on_first_attempt() {
        let calls = &AtomicU32::new(0);
        let exec = RetryExecutor::new(policy(4));
        let out: Outcome<()> = exec
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Failure::fatal(SyncError::permanent("bad barcode")))
                },
                no_refresh,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.result.unwrap_err().kind, ErrorKind::PermanentValidation);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let exec = RetryExecutor::new(policy(4));
        let out = exec
            .execute(
                |attempt| async move {
                    if attempt < 3 {
                        Err(Failure::transient(SyncError::transient("503")))
                    } else {
                        Ok(attempt)
                    }
                },
                no_refresh,
            )
            .await;
        assert_eq!(*out.result.as_ref().unwrap(), 3);
        assert_eq!(out.retries_used(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_expired_refreshes_once_then_retries() {
        let refreshes = &AtomicU32::new(0);
        let exec = RetryExecutor::new(policy(1));
        let out = exec
            .execute(
                |attempt| async move {
                    if attempt == 1 {
                        Err(Failure {
                            class: Classification::AuthExpired,
                            error: SyncError::auth(AuthFailure::InvalidCredentials, "401"),
                            retry_after: None,
                        })
                    } else {
                        Ok("ok")
                    }
                },
                move || async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;
        assert_eq!(out.result.unwrap(), "ok");
        assert_eq!(out.attempts, 2, "refresh retry is allowed beyond max_attempts=1");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_auth_expiry_surfaces_invalid_credentials() {
        let refreshes = &AtomicU32::new(0);
        let exec = RetryExecutor::new(policy(4));
        let out: Outcome<()> = exec
            .execute(
                move |_| async move {
                    Err(Failure {
                        class: Classification::AuthExpired,
                        error: SyncError::auth(AuthFailure::InvalidCredentials, "401"),
                        retry_after: None,
                    })
                },
                move || async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(
            out.result.unwrap_err().kind,
            ErrorKind::Auth(AuthFailure::InvalidCredentials)
        );
        assert_eq!(out.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_surfaces_refresh_error() {
        let exec = RetryExecutor::new(policy(4));
        let out: Outcome<()> = exec
            .execute(
                move |_| async move {
                    Err(Failure {
                        class: Classification::AuthExpired,
                        error: SyncError::auth(AuthFailure::InvalidCredentials, "401"),
                        retry_after: None,
                    })
                },
                move || async move {
                    Err(SyncError::auth(
                        AuthFailure::TemporarilyUnavailable,
                        "token endpoint 503",
                    ))
                },
            )
            .await;
        assert_eq!(
            out.result.unwrap_err().kind,
            ErrorKind::Auth(AuthFailure::TemporarilyUnavailable)
        );
    }
}
