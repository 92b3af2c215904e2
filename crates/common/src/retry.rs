// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of AccountFlow.
//
// AccountFlow is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// AccountFlow is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with AccountFlow. If not, see <https://www.gnu.org/licenses/>.

//! Bounded retry with exponential backoff.
//!
//! ## Formula
//! backoff = min(initial_backoff * multiplier^(attempt-1), max_backoff)
//! jittered_backoff = backoff * (1 + random(-jitter, +jitter))

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for checks and store operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub initial_backoff: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_multiplier: f64,

    /// Cap for exponential growth
    pub max_backoff: Duration,

    /// Random jitter fraction (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Fast deterministic policy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            max_backoff: Duration::from_millis(1),
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Backoff to wait after the given failed attempt (1-based), without jitter.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs < 0.0 {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs).min(self.max_backoff)
    }

    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let backoff = self.calculate_backoff(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return backoff;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        backoff.mul_f64(factor)
    }
}

/// Last error of an exhausted or non-retryable operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure<E> {
    pub error: E,
    /// Attempts made, including the failing one
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached.
///
/// ## Arguments
/// * `operation` - Name used in log events
/// * `is_retryable` - Classifies an error as transient
/// * `op` - Invoked with the 1-based attempt number
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && is_retryable(&error) => {
                let backoff = policy.jittered_backoff(attempt);
                debug!(
                    operation = %operation,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(error) => {
                if is_retryable(&error) {
                    warn!(operation = %operation, attempts = attempt, error = %error, "Retries exhausted");
                }
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}
