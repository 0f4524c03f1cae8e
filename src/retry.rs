//! Retry policy engine.
//!
//! Three named policies cover the operations that can fail transiently:
//! filesystem access, package (zip/XML) operations, and the lookup service
//! call. Each policy sets a total attempt count, a base delay, a delay cap,
//! and a [`Backoff`] shape. Whether an error is worth retrying is decided by
//! a predicate, by default [`Retryable::is_transient`]: a locked file is
//! retried, an integrity failure never is.
//!
//! Back-off sleeps race against a [`CancellationToken`]; cancellation ends
//! the loop with [`RetryError::Cancelled`] without another attempt.
//!
//! | Shape | Delay before attempt `n + 1` |
//! |-------|------------------------------|
//! | `fixed` | `base` |
//! | `linear` | `base * n` |
//! | `exponential` | `base * 2^(n - 1)` |
//! | `exponential_jitter` | exponential, scaled by a random factor in `[0.5, 1.5]` |
//!
//! All delays are capped at `max_delay_ms`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{io_is_transient, PackageError, ResolveError, SessionError};

const JITTER_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
    ExponentialJitter,
}

/// One named retry policy. Missing fields default to the file I/O policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn file_io() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff: Backoff::ExponentialJitter,
        }
    }

    pub fn package() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            backoff: Backoff::Linear,
        }
    }

    pub fn network() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
            backoff: Backoff::Exponential,
        }
    }

    /// A single attempt, no delay.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay after `failures` failed attempts (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let n = failures.max(1);
        let base = self.base_delay_ms;
        let ms = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Linear => base.saturating_mul(n as u64),
            Backoff::Exponential | Backoff::ExponentialJitter => {
                base.saturating_mul(1u64 << (n - 1).min(20))
            }
        };
        let capped = Duration::from_millis(ms.min(self.max_delay_ms));
        match self.backoff {
            Backoff::ExponentialJitter => apply_jitter(capped, JITTER_FACTOR),
            _ => capped,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::file_io()
    }
}

/// The policies used by a session, one per kind of operation.
///
/// A config table that sets only some fields keeps the named policy's
/// values for the rest, so `[retry.network]` with just `max_attempts` still
/// backs off exponentially from one second.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicies {
    pub file_io: RetryPolicy,
    pub package: RetryPolicy,
    pub network: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyTable {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    backoff: Option<Backoff>,
}

impl PolicyTable {
    fn over(self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(base.base_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff: self.backoff.unwrap_or(base.backoff),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolicyTables {
    file_io: PolicyTable,
    package: PolicyTable,
    network: PolicyTable,
}

impl<'de> Deserialize<'de> for RetryPolicies {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tables = PolicyTables::deserialize(deserializer)?;
        Ok(Self {
            file_io: tables.file_io.over(RetryPolicy::file_io()),
            package: tables.package.over(RetryPolicy::package()),
            network: tables.network.over(RetryPolicy::network()),
        })
    }
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            file_io: RetryPolicy::file_io(),
            package: RetryPolicy::package(),
            network: RetryPolicy::network(),
        }
    }
}

/// Errors that know whether they are worth retrying.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for SessionError {
    fn is_transient(&self) -> bool {
        SessionError::is_transient(self)
    }
}

impl Retryable for ResolveError {
    fn is_transient(&self) -> bool {
        ResolveError::is_transient(self)
    }
}

impl Retryable for PackageError {
    fn is_transient(&self) -> bool {
        matches!(self, PackageError::Io(e) if io_is_transient(e))
    }
}

impl Retryable for std::io::Error {
    fn is_transient(&self) -> bool {
        io_is_transient(self)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    /// The last error, either permanent or returned by the final attempt.
    Failed { attempts: u32, source: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Cancelled => f.write_str("cancelled"),
            RetryError::Failed { attempts, source } => {
                write!(f, "{} (after {} attempt(s))", source, attempts)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

impl<E: Into<SessionError>> From<RetryError<E>> for SessionError {
    fn from(err: RetryError<E>) -> Self {
        match err {
            RetryError::Cancelled => SessionError::Cancelled,
            RetryError::Failed { source, .. } => source.into(),
        }
    }
}

/// Run `operation` under `policy`, retrying transient errors.
pub async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    name: &str,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run_with(policy, name, cancel, |e: &E| e.is_transient(), operation).await
}

/// Run `operation` under `policy` with a custom retry predicate.
///
/// The operation receives the 1-based attempt number.
pub async fn run_with<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    name: &str,
    cancel: &CancellationToken,
    should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    P: Fn(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= max_attempts || !should_retry(&err) {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        source: err,
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying: {}",
                    err
                );
                if wait_with_cancel(cancel, delay).await.is_err() {
                    return Err(RetryError::Cancelled);
                }
            }
        }
    }
}

async fn wait_with_cancel(cancel: &CancellationToken, duration: Duration) -> Result<(), ()> {
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(()),
    }
}

fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    let jitter = rand::rng().random_range(-factor..=factor);
    let ms = (duration.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(ms)
}
