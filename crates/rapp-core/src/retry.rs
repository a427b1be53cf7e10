// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry-with-backoff around outbound calls.
//!
//! Attempts run strictly one after another. Between attempt `i` and `i + 1`
//! the caller waits `base_delay * multiplier^i`; nothing is waited after the
//! final attempt. Each failed attempt bumps the upstream's failure counter
//! as it fails, and a success bumps the success counter once.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error};

use crate::credentials::AuthError;
use crate::metrics::MetricsRegistry;
use crate::upstream::Upstream;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// `max_attempts` of zero is treated as a single attempt.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
        }
    }

    /// Delay after the failed attempt with 0-based `attempt_index`.
    #[must_use]
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = self
            .multiplier
            .powi(i32::try_from(attempt_index).unwrap_or(i32::MAX));
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

/// How the retry loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Server-side error or timeout.
    Transient,
    /// 401: the credential was refreshed, try again.
    CredentialExpired,
    /// Anything else fails the call immediately.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("upstream responded with status {status}")]
    Status { status: u16, body: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("could not obtain credential: {0}")]
    Auth(#[from] AuthError),
}

impl FetchError {
    /// Splits transport errors into timeout, connect, decode and generic.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Status { status, .. } if *status >= 500 => FailureKind::Transient,
            FetchError::Status { status: 401, .. } => FailureKind::CredentialExpired,
            FetchError::Timeout(_) => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, FetchError::Connect(_))
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Runs `op` under `policy`, recording every outcome against `upstream`.
///
/// `op` receives the 0-based attempt index. The terminal error is returned
/// once attempts are exhausted or a permanent failure occurs.
pub async fn fetch<T, F, Fut>(
    metrics: &MetricsRegistry,
    upstream: Upstream,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => {
                metrics.increment(upstream.success_counter());
                debug!("{upstream} request succeeded on attempt {}", attempt + 1);
                return Ok(value);
            }
            Err(err) => {
                metrics.increment(upstream.failure_counter());
                let retryable = err.kind() != FailureKind::Permanent;
                if !retryable || attempt + 1 >= max_attempts {
                    error!(
                        "Could not retrieve {upstream} data after {} attempt(s): {err}",
                        attempt + 1
                    );
                    return Err(err);
                }
                error!(
                    "Could not retrieve {upstream} data. {err} Retrying... ({}/{max_attempts})",
                    attempt + 1
                );
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Counter;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Paused-clock sleeps land on millisecond ticks.
    fn assert_offsets(seen: &[Duration], expected: &[Duration]) {
        assert_eq!(seen.len(), expected.len(), "attempts: {seen:?}");
        for (actual, expected) in seen.iter().zip(expected) {
            assert!(
                *actual >= *expected && *actual - *expected < Duration::from_millis(5),
                "expected {expected:?}, observed {actual:?}"
            );
        }
    }

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn delays_grow_geometrically() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, 2.0).max_attempts, 1);
    }

    #[test]
    fn huge_delays_saturate() {
        let policy = RetryPolicy::new(3, Duration::from_secs(u64::MAX / 2), 10.0);
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
    }

    #[test]
    fn classification() {
        assert_eq!(status(503).kind(), FailureKind::Transient);
        assert_eq!(status(500).kind(), FailureKind::Transient);
        assert_eq!(status(401).kind(), FailureKind::CredentialExpired);
        assert_eq!(status(404).kind(), FailureKind::Permanent);
        assert_eq!(status(400).kind(), FailureKind::Permanent);
        assert_eq!(FetchError::Timeout(String::new()).kind(), FailureKind::Transient);
        assert_eq!(FetchError::Connect(String::new()).kind(), FailureKind::Permanent);
        assert_eq!(FetchError::Decode(String::new()).kind(), FailureKind::Permanent);
        assert_eq!(
            FetchError::Auth(AuthError::Unreachable(String::new())).kind(),
            FailureKind::Permanent
        );
    }

    async fn run(
        policy: RetryPolicy,
        outcomes: Vec<Result<&'static str, FetchError>>,
    ) -> (Result<&'static str, FetchError>, MetricsRegistry, Vec<Duration>) {
        let metrics = MetricsRegistry::new("app");
        let outcomes = Mutex::new(outcomes.into_iter());
        let started = Instant::now();
        let seen = Mutex::new(Vec::new());

        let result = fetch(&metrics, Upstream::Topology, &policy, |_| {
            seen.lock().expect("lock").push(started.elapsed());
            let next = outcomes
                .lock()
                .expect("lock")
                .next()
                .expect("more attempts than scripted");
            async move { next }
        })
        .await;

        let seen = seen.into_inner().expect("lock");
        (result, metrics, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let (result, metrics, seen) =
            run(policy, vec![Err(status(503)), Err(status(503)), Ok("body")]).await;

        assert_eq!(result, Ok("body"));
        assert_eq!(metrics.get(Counter::TopologyFailedRequests), 2);
        assert_eq!(metrics.get(Counter::TopologySuccessfulRequests), 1);
        assert_offsets(
            &seen,
            &[Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_terminal_error() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let started = Instant::now();
        let (result, metrics, seen) =
            run(policy, vec![Err(status(502)), Err(status(503)), Err(status(504))]).await;

        assert_eq!(result, Err(status(504)));
        assert_eq!(metrics.get(Counter::TopologyFailedRequests), 3);
        assert_eq!(metrics.get(Counter::TopologySuccessfulRequests), 0);
        // No delay after the final attempt.
        assert_offsets(
            &seen,
            &[Duration::ZERO, Duration::from_secs(1), Duration::from_secs(3)],
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let (result, metrics, seen) = run(policy, vec![Err(status(404))]).await;

        assert_eq!(result, Err(status(404)));
        assert_eq!(seen.len(), 1);
        assert_eq!(metrics.get(Counter::TopologyFailedRequests), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_is_not_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let (result, _, seen) =
            run(policy, vec![Err(FetchError::Connect("refused".to_string()))]).await;

        assert!(result.expect_err("connect error").is_connect());
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_credential_is_retried() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), 2.0);
        let (result, metrics, seen) = run(policy, vec![Err(status(401)), Ok("body")]).await;

        assert_eq!(result, Ok("body"));
        assert_eq!(seen.len(), 2);
        assert_eq!(metrics.get(Counter::TopologyFailedRequests), 1);
        assert_eq!(metrics.get(Counter::TopologySuccessfulRequests), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), 2.0);
        let (result, _, seen) = run(
            policy,
            vec![Err(FetchError::Timeout("deadline".to_string())), Ok("body")],
        )
        .await;

        assert_eq!(result, Ok("body"));
        assert_offsets(&seen, &[Duration::ZERO, Duration::from_millis(100)]);
    }
}
