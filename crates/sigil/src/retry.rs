/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Retry policy for backend signing calls.
//!
//! A [`RetryPolicy`] is a plain value: attempt budget, backoff curve, jitter
//! and the conditions under which a failure may be retried. It is applied to
//! an async operation with [`RetryPolicy::execute`]:
//!
//! ```rust,ignore
//! let policy = RetryPolicy::default();
//! let location = policy
//!     .execute("remote_sign", || authority.sign_detached(&input, key_id))
//!     .await?;
//! ```
//!
//! # Backoff
//!
//! With the default exponential strategy the delay before attempt `n` (n ≥ 2)
//! is `min(max_delay, initial_delay * 2^(n-2))`. The defaults (10 attempts,
//! 1 s initial, 60 s cap, no jitter) match the signing service's historical
//! behaviour.
//!
//! Sleeping goes through `tokio::time`, so tests can run a paused clock.

use crate::error::{ErrorKind, SignError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default cap on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay grows linearly with the number of failed attempts.
    Linear { multiplier: f64 },
    /// Delay grows as `multiplier * base^(failed_attempts - 1)`.
    Exponential { base: f64, multiplier: f64 },
}

/// Conditions a failure must satisfy to be retried. All listed conditions
/// must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryCondition {
    /// Never retry.
    Never,
    /// Retry every failure, including terminal kinds.
    AllErrors,
    /// Retry only failures classified as [`ErrorKind::Transient`].
    TransientOnly,
    /// Retry failures whose message contains one of the patterns
    /// (case-insensitive).
    ErrorPattern { patterns: Vec<String> },
}

/// Errors that can be classified for retry decisions.
pub trait Classify {
    fn error_kind(&self) -> ErrorKind;
}

impl Classify for SignError {
    fn error_kind(&self) -> ErrorKind {
        self.kind()
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The retry conditions rejected the failure; no further attempts were made.
    #[error("{operation} failed with a non-retriable error after {attempts} attempt(s): {error}")]
    Terminal {
        operation: String,
        attempts: u32,
        error: E,
    },

    /// Every allowed attempt failed. Carries the last error.
    #[error("{operation} failed after exhausting {attempts} attempt(s): {error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Terminal { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::Terminal { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Retry configuration applied around a fallible async operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_strategy: BackoffStrategy,
    pub retry_conditions: Vec<RetryCondition>,
    /// Adds up to 25% random delay on top of the computed backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_strategy: BackoffStrategy::Exponential {
                base: 2.0,
                multiplier: 1.0,
            },
            retry_conditions: vec![RetryCondition::TransientOnly],
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Creates a builder seeded with the default policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            retry_conditions: vec![RetryCondition::Never],
            ..Self::default()
        }
    }

    /// Delay to wait after `failed_attempts` consecutive failures.
    ///
    /// `failed_attempts` is 1 after the first failure, so the first retry waits
    /// `initial_delay` under the exponential and fixed strategies.
    pub fn calculate_delay(&self, failed_attempts: u32) -> Duration {
        let failed_attempts = failed_attempts.max(1);
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let secs = match &self.backoff_strategy {
            BackoffStrategy::Fixed => initial,
            BackoffStrategy::Linear { multiplier } => {
                initial * multiplier * f64::from(failed_attempts)
            }
            BackoffStrategy::Exponential { base, multiplier } => {
                let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
                initial * multiplier * base.powi(exponent)
            }
        };

        let mut secs = if secs.is_finite() { secs.max(0.0) } else { max };
        if self.jitter && secs > 0.0 {
            secs += rand::thread_rng().gen_range(0.0..=secs * 0.25);
        }

        Duration::from_secs_f64(secs.min(max))
    }

    /// Whether the retry conditions accept this failure.
    pub fn should_retry<E>(&self, error: &E) -> bool
    where
        E: Classify + fmt::Display,
    {
        self.retry_conditions
            .iter()
            .all(|condition| match condition {
                RetryCondition::Never => false,
                RetryCondition::AllErrors => true,
                RetryCondition::TransientOnly => error.error_kind() == ErrorKind::Transient,
                RetryCondition::ErrorPattern { patterns } => {
                    let message = error.to_string().to_lowercase();
                    patterns
                        .iter()
                        .any(|pattern| message.contains(&pattern.to_lowercase()))
                }
            })
    }

    /// Runs `operation` until it succeeds, fails with a rejected error, or the
    /// attempt budget runs out.
    ///
    /// The operation is re-created for every attempt, so captured state must be
    /// safe to reuse.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Classify + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !self.should_retry(&err) => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        kind = %err.error_kind(),
                        error = %err,
                        "Non-retriable error, giving up"
                    );
                    return Err(RetryError::Terminal {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) if attempt >= max_attempts => {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    crate::metrics::record_retry_exhausted(operation_name);
                    return Err(RetryError::Exhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) => {
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retriable error, retrying after backoff"
                    );
                    crate::metrics::record_retry(operation_name);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.backoff_strategy = strategy;
        self
    }

    pub fn retry_condition(mut self, condition: RetryCondition) -> Self {
        self.policy.retry_conditions = vec![condition];
        self
    }

    pub fn retry_conditions(mut self, conditions: Vec<RetryCondition>) -> Self {
        self.policy.retry_conditions = conditions;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}
