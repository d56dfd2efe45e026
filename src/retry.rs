//! Retry policy for failed export calls
//!
//! A policy decides two things: whether a failure is worth retrying at all,
//! and how long to wait before the next attempt. Servers may attach an
//! explicit throttle hint to a retryable failure; when present it replaces
//! the policy's own backoff schedule for that wait.

use crate::errors::{ExportFailure, ExporterError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::debug;

/// Result of classifying a single failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retryable: bool,
    pub wait_hint: Option<Duration>,
}

/// Pluggable retry behaviour.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Decide whether `failure` can be retried and whether the peer asked for a specific wait.
    fn classify(&self, failure: &ExportFailure) -> RetryDecision {
        retryable(failure)
    }

    /// Wait before retry number `retry` (1-based), or `None` to give up.
    fn backoff(&self, retry: u32, elapsed: Duration) -> Option<Duration>;
}

/// Transient server/transport conditions are retryable, everything else is terminal.
pub fn retryable(failure: &ExportFailure) -> RetryDecision {
    match failure.code {
        Code::Cancelled
        | Code::DeadlineExceeded
        | Code::ResourceExhausted
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable
        | Code::DataLoss => RetryDecision {
            retryable: true,
            wait_hint: failure.retry_after,
        },
        _ => RetryDecision {
            retryable: false,
            wait_hint: None,
        },
    }
}

/// Exponential backoff schedule. Disabled by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub enabled: bool,

    /// Wait before the first retry
    pub initial_interval: Duration,

    /// Cap for a single wait
    pub max_interval: Duration,

    /// Growth factor between consecutive waits
    pub multiplier: f64,

    /// Give up once this much time has been spent on one batch (`None` = never)
    pub max_elapsed_time: Option<Duration>,

    /// Give up after this many retries (`None` = never)
    pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            max_elapsed_time: Some(Duration::from_secs(60)),
            max_retries: None,
        }
    }
}

impl RetryConfig {
    /// Zero retries: every failure is final
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Default schedule, enabled
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Retry forever with the given starting interval
    pub fn unlimited(initial_interval: Duration) -> Self {
        Self {
            enabled: true,
            initial_interval,
            max_interval: initial_interval.max(Duration::from_secs(30)),
            max_elapsed_time: None,
            max_retries: None,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(64) as i32;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = Duration::from_millis(millis.min(self.max_interval.as_millis() as f64) as u64);
        delay.min(self.max_interval)
    }
}

impl RetryPolicy for RetryConfig {
    fn backoff(&self, retry: u32, elapsed: Duration) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if let Some(max_retries) = self.max_retries
            && retry > max_retries
        {
            return None;
        }

        let delay = self.delay_for_retry(retry);
        if let Some(max_elapsed) = self.max_elapsed_time
            && elapsed + delay > max_elapsed
        {
            return None;
        }
        Some(delay)
    }
}

/// Run `attempt` until it succeeds, fails terminally, the policy gives up,
/// or `cancel` fires during a wait.
pub async fn execute<F, Fut>(
    policy: &dyn RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<(), ExporterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ExportFailure>>,
{
    let started = Instant::now();
    let mut retries = 0u32;

    loop {
        let failure = match attempt().await {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        let decision = policy.classify(&failure);
        if !decision.retryable {
            return Err(failure.into());
        }

        retries += 1;
        let Some(backoff) = policy.backoff(retries, started.elapsed()) else {
            return Err(failure.into());
        };
        let delay = decision.wait_hint.unwrap_or(backoff);

        debug!("Retryable export failure ({}), retry {} in {:?}", failure, retries, delay);

        tokio::select! {
            _ = cancel.cancelled() => return Err(ExporterError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}
