//! Shared retry combinator.
//!
//! Replaces per-call-site retry loops: every transient operation (platform
//! CLI invocations, state-store writes) goes through [`with_retry`] with its
//! own [`RetryConfig`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry behavior for a single operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single attempt, no delay.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` up to `config.attempts` times, sleeping `config.delay` between
/// failures. The closure receives the 1-based attempt number. Returns the
/// first success or the last error.
pub async fn with_retry<T, E, F, Fut>(config: RetryConfig, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < attempts {
                    tracing::warn!(
                        target: "stratus::retry",
                        "{label} attempt {attempt}/{attempts} failed: {err}; retrying in {:?}",
                        config.delay
                    );
                    tokio::time::sleep(config.delay).await;
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.expect("at least one attempt"))
}
