use sea_orm::DbErr;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::CheckoutError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, the first call included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// One call plus a single retry; used for idempotent collaborator reads.
    pub fn single_retry() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            ..Self::default()
        }
    }
}

/// Decides whether a failed attempt is worth repeating
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries every error
pub struct AlwaysRetry;

impl<E> RetryPolicy<E> for AlwaysRetry {
    fn is_retryable(&self, _error: &E) -> bool {
        true
    }
}

/// Retries transient store failures: lost connections and lock contention
/// (`SQLITE_BUSY`, Postgres serialization and deadlock aborts).
pub struct DbRetryPolicy;

impl RetryPolicy<DbErr> for DbRetryPolicy {
    fn is_retryable(&self, error: &DbErr) -> bool {
        match error {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
            DbErr::Exec(_) | DbErr::Query(_) => is_contention(&error.to_string()),
            _ => false,
        }
    }
}

impl RetryPolicy<CheckoutError> for DbRetryPolicy {
    fn is_retryable(&self, error: &CheckoutError) -> bool {
        match error {
            CheckoutError::Database(e) => RetryPolicy::<DbErr>::is_retryable(self, e),
            _ => false,
        }
    }
}

fn is_contention(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    [
        "database is locked",
        "database table is locked",
        "(code: 5)",
        "(code: 6)",
        "could not serialize access",
        "deadlock detected",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Execute an async operation, retrying per `config` and `policy`
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(attempts, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    warn!(attempts, %error, "Operation failed, giving up");
                    return Err(error);
                }

                warn!(attempts, %error, retry_in = ?delay, "Attempt failed, retrying");

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
