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

//! Parallel validation runner.
//!
//! ## Implementation
//! - Spawns one task per check
//! - Waits for all checks to complete (join_all); no short-circuit
//! - Transient failures are retried per check with exponential backoff
//! - Any malformed-data failure fails the whole run; it takes precedence
//!   over transient or aborted checks, first in check order wins

use crate::{CheckError, CheckEvaluator, CheckKind, CheckOutcome, ValidationError};
use accountflow_common::{retry_with_backoff, Application, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Runs every configured check against an application.
#[derive(Clone)]
pub struct ValidationRunner {
    evaluator: Arc<dyn CheckEvaluator>,
    retry_policy: RetryPolicy,
    checks: Vec<CheckKind>,
}

impl ValidationRunner {
    pub fn new(evaluator: Arc<dyn CheckEvaluator>, retry_policy: RetryPolicy) -> Self {
        Self {
            evaluator,
            retry_policy,
            checks: CheckKind::ALL.to_vec(),
        }
    }

    /// Restrict the run to a subset of checks (kept in the given order).
    pub fn with_checks(mut self, checks: Vec<CheckKind>) -> Self {
        self.checks = checks;
        self
    }

    pub fn checks(&self) -> &[CheckKind] {
        &self.checks
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run all checks concurrently.
    ///
    /// ## Returns
    /// One outcome per check, in check order
    ///
    /// ## Errors
    /// - [`ValidationError::MalformedData`] if any check could not evaluate its input
    /// - [`ValidationError::Transient`] if a check exhausted its retries
    /// - [`ValidationError::Aborted`] if a check task panicked
    #[instrument(skip(self, application), fields(application_id = %application.id))]
    pub async fn run_all(&self, application: &Application) -> Result<Vec<CheckOutcome>, ValidationError> {
        let tasks: Vec<_> = self
            .checks
            .iter()
            .map(|&check| {
                let evaluator = self.evaluator.clone();
                let policy = self.retry_policy.clone();
                let input = check.attribute(application).to_string();
                tokio::spawn(async move { run_check(evaluator, policy, check, input).await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let mut outcomes = Vec::with_capacity(results.len());
        let mut malformed = None;
        let mut fatal = None;

        for (&check, result) in self.checks.iter().zip(results) {
            match result {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(err @ ValidationError::MalformedData { .. })) => {
                    if malformed.is_none() {
                        malformed = Some(err);
                    }
                }
                Ok(Err(err)) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(join_err) => {
                    if fatal.is_none() {
                        fatal = Some(ValidationError::Aborted {
                            check,
                            message: format!("Check {} panicked: {}", check, join_err),
                        });
                    }
                }
            }
        }

        if let Some(err) = malformed.or(fatal) {
            warn!(application_id = %application.id, error = %err, "Validation failed");
            return Err(err);
        }

        debug!(
            application_id = %application.id,
            flagged = outcomes.iter().filter(|o| o.flagged).count(),
            "Validation completed"
        );
        Ok(outcomes)
    }
}

async fn run_check(
    evaluator: Arc<dyn CheckEvaluator>,
    policy: RetryPolicy,
    check: CheckKind,
    input: String,
) -> Result<CheckOutcome, ValidationError> {
    let result = retry_with_backoff(&policy, check.as_str(), CheckError::is_transient, |_attempt| {
        metrics::counter!("accountflow_check_attempts_total", "check" => check.as_str()).increment(1);
        let evaluator = evaluator.clone();
        let input = input.clone();
        async move { evaluator.evaluate(check, &input).await }
    })
    .await;

    let (label, outcome) = match result {
        Ok(flagged) => (
            if flagged { "flagged" } else { "passed" },
            Ok(CheckOutcome { check, flagged }),
        ),
        Err(failure) => match failure.error {
            CheckError::MalformedData { detail } => {
                ("malformed", Err(ValidationError::MalformedData { check, detail }))
            }
            other => (
                "failed",
                Err(ValidationError::Transient {
                    check,
                    attempts: failure.attempts,
                    message: other.to_string(),
                }),
            ),
        },
    };
    metrics::counter!("accountflow_check_results_total", "check" => check.as_str(), "result" => label)
        .increment(1);
    outcome
}
