//! Retry logic with exponential backoff
//!
//! Transport-level retries for calls to Azure Resource Manager. Only errors
//! classified as transient are retried; every retry is logged against the
//! storage account it targets.

use crate::error::Result;
use crate::utils::network::is_retryable_error;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub max_retries: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryOptions {
    /// Wait before the next attempt, capped at `max_interval`
    pub fn next_interval(&self, interval: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(interval.as_secs_f64() * self.multiplier),
            self.max_interval,
        )
    }
}

/// Which side of the read-modify-write cycle is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountCall {
    FetchRules,
    UpdateRules,
}

impl fmt::Display for AccountCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountCall::FetchRules => write!(f, "fetch network rules"),
            AccountCall::UpdateRules => write!(f, "update network rules"),
        }
    }
}

/// Run `operation` against `account`, retrying transient failures.
///
/// Non-transient errors return immediately. When retries run out the last
/// transient error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    account: &str,
    call: AccountCall,
    options: &RetryOptions,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut interval = options.initial_interval;
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(account, %call, attempt, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        if !is_retryable_error(&error) {
            return Err(error);
        }

        if attempt >= options.max_retries {
            warn!(account, %call, attempts = attempt + 1, %error, "Giving up after transient failures");
            return Err(error);
        }

        attempt += 1;
        warn!(account, %call, attempt, ?interval, %error, "Transient failure, retrying");
        sleep(interval).await;
        interval = options.next_interval(interval);
    }
}
