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

//! # Workflow Orchestrator
//!
//! ## Purpose
//! Drives an application from submission to a terminal state:
//!
//! ```text
//! submit ──► VALIDATING ──► run checks ──┬── malformed ──► FLAGGED_UNPROCESSABLE
//!                                        ├── none flagged ──► APPROVED
//!                                        └── any flagged ──► PENDING_REVIEW (suspended)
//!
//! resume(token, APPROVE) ──► REVIEW_APPROVED ──► APPROVED
//! resume(token, REJECT)  ──► REVIEW_REJECTED ──► REJECTED
//! expire(token)          ──► REVIEW_EXPIRED
//! ```
//!
//! ## Design
//! - **Stateless between steps**: every step starts by reading the record;
//!   nothing about an application is kept in memory across calls, so any
//!   orchestrator sharing the same store and correlator can resume it
//! - **Optimistic concurrency**: every transition is a conditional update;
//!   on a version conflict the record is re-read and the step is either
//!   recognized as already applied or retried against the new version
//! - **Suspension is data**: a review suspension is a correlation entry plus
//!   the token on the record; `resume` and `expire` are separate calls

use crate::config::WorkflowConfig;
use crate::correlator::{ResumeCorrelator, SuspendedExecution};
use crate::types::{Flag, RecoveryReport, ReviewDecision, WorkflowError, WorkflowResult};
use accountflow_checks::{CheckEvaluator, CheckOutcome, ValidationError, ValidationRunner};
use accountflow_common::{
    new_application_id, retry_with_backoff, Application, ApplicationState, NewApplication,
};
use accountflow_store::{
    ApplicationMutation, ApplicationStore, Page, PaginationKey, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reconciliation rounds before a contended transition gives up.
const MAX_RECONCILE_ATTEMPTS: u32 = 5;

/// Review-pipeline state machine.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn ApplicationStore>,
    correlator: Arc<dyn ResumeCorrelator>,
    runner: ValidationRunner,
    config: WorkflowConfig,
}

impl Orchestrator {
    /// Create an orchestrator running every built-in check kind through `evaluator`.
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        correlator: Arc<dyn ResumeCorrelator>,
        evaluator: Arc<dyn CheckEvaluator>,
        config: WorkflowConfig,
    ) -> Self {
        let runner = ValidationRunner::new(evaluator, config.check_retry.clone());
        Self::with_runner(store, correlator, runner, config)
    }

    /// Create an orchestrator with a preconfigured runner.
    pub fn with_runner(
        store: Arc<dyn ApplicationStore>,
        correlator: Arc<dyn ResumeCorrelator>,
        runner: ValidationRunner,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            correlator,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ApplicationStore> {
        &self.store
    }

    pub fn correlator(&self) -> &Arc<dyn ResumeCorrelator> {
        &self.correlator
    }

    /// Submit an application and drive it to its next rest point.
    ///
    /// ## Returns
    /// The latest record: terminal or suspended for review
    ///
    /// ## Errors
    /// - Any failure before the workflow is durably started; the created
    ///   record has been deleted in that case
    /// - Any failure after the start commit (e.g. checks still failing once
    ///   retries are exhausted); the record stays in `VALIDATING` and is
    ///   picked up by [`Orchestrator::recover_validating`]
    #[instrument(skip(self, attrs))]
    pub async fn submit(&self, attrs: NewApplication) -> WorkflowResult<Application> {
        let started = self.start(attrs).await?;
        self.process(&started.id).await.map_err(|e| {
            warn!(
                application_id = %started.id,
                error = %e,
                "Validation aborted; application left in VALIDATING for recovery"
            );
            e
        })
    }

    /// Create the record and durably start its workflow (`SUBMITTED → VALIDATING`).
    ///
    /// On failure after creation the record is deleted and the original
    /// error is returned.
    #[instrument(skip(self, attrs))]
    pub async fn start(&self, attrs: NewApplication) -> WorkflowResult<Application> {
        let created = self.create_record(attrs).await?;
        info!(application_id = %created.id, "Application submitted");

        match self
            .advance(
                &created.id,
                "start",
                ApplicationState::Validating,
                ApplicationMutation::transition(ApplicationState::Validating),
            )
            .await
        {
            Ok(application) => Ok(application),
            Err(e) => {
                warn!(application_id = %created.id, error = %e, "Workflow start failed; deleting record");
                let store = &self.store;
                let id = created.id.as_str();
                if let Err(delete_err) = self
                    .with_store_retry("delete", move |_| store.delete(id))
                    .await
                {
                    warn!(
                        application_id = %created.id,
                        error = %delete_err,
                        "Compensating delete failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Run the validation step for an application in `VALIDATING`.
    ///
    /// Applications already past validation are returned unchanged.
    ///
    /// ## Errors
    /// - [`WorkflowError::Validation`] when a check exhausted its retries or aborted;
    ///   the application stays in `VALIDATING`
    /// - [`WorkflowError::InvalidState`] for an application not yet started
    #[instrument(skip(self))]
    pub async fn process(&self, id: &str) -> WorkflowResult<Application> {
        let application = self.load(id).await?;
        match application.state {
            ApplicationState::Validating => {}
            ApplicationState::Submitted => {
                return Err(WorkflowError::InvalidState {
                    id: id.to_string(),
                    state: application.state,
                    operation: "process",
                })
            }
            state => {
                debug!(application_id = %id, state = %state, "Validation already completed");
                return Ok(application);
            }
        }

        match self.runner.run_all(&application).await {
            Err(ValidationError::MalformedData { check, detail }) => {
                info!(application_id = %id, check = %check, "Input cannot be evaluated");
                self.flag(id, Flag::UnprocessableData { error_detail: detail })
                    .await
            }
            Err(fatal) => {
                metrics::counter!("accountflow_workflow_aborted_total", "step" => "validate")
                    .increment(1);
                Err(fatal.into())
            }
            Ok(outcomes) => match review_reason(&outcomes) {
                Some(reason) => self.suspend_for_review(id, reason).await,
                None => self.approve(id).await,
            },
        }
    }

    async fn suspend_for_review(&self, id: &str, reason: String) -> WorkflowResult<Application> {
        let suspended = self
            .correlator
            .suspend(id, self.config.review_timeout)
            .await?;
        let token = suspended.resume_token.clone();

        match self
            .flag(
                id,
                Flag::Review {
                    reason,
                    resume_token: token.clone(),
                },
            )
            .await
        {
            Ok(application) => {
                if application.resume_token.as_deref() != Some(token.as_str()) {
                    // Another execution suspended this application first
                    self.discard_correlation(&token).await;
                }
                Ok(application)
            }
            Err(e) => {
                self.discard_correlation(&token).await;
                Err(e)
            }
        }
    }

    async fn discard_correlation(&self, token: &str) {
        if let Err(e) = self.correlator.cancel(token).await {
            warn!(error = %e, "Failed to discard unpublished resume token");
        }
    }

    /// Apply a flag: suspend for review or mark the input unprocessable.
    #[instrument(skip(self, flag), fields(flag_type = flag.flag_type().as_str()))]
    pub async fn flag(&self, id: &str, flag: Flag) -> WorkflowResult<Application> {
        let target = flag.target_state();
        let mutation = match flag {
            Flag::Review {
                reason,
                resume_token,
            } => ApplicationMutation::transition(target)
                .with_reason(reason)
                .with_resume_token(resume_token),
            Flag::UnprocessableData { error_detail } => ApplicationMutation::transition(target)
                .with_reason(error_detail)
                .clear_resume_token(),
        };
        self.advance(id, "flag", target, mutation).await
    }

    /// Deliver a reviewer's decision for an application awaiting review.
    ///
    /// The decision is parsed before anything is read or written.
    #[instrument(skip(self))]
    pub async fn submit_review_decision(&self, id: &str, decision: &str) -> WorkflowResult<Application> {
        let decision: ReviewDecision = decision.parse()?;
        let application = self.load(id).await?;
        if application.state != ApplicationState::PendingReview {
            return Err(WorkflowError::InvalidState {
                id: id.to_string(),
                state: application.state,
                operation: "submit review decision",
            });
        }
        let token = application.resume_token.ok_or_else(|| {
            WorkflowError::InvalidToken(format!("{} has no active resume token", id))
        })?;
        self.resume(&token, decision).await
    }

    /// Resume the execution suspended under `token` with `decision`.
    ///
    /// ## Errors
    /// [`WorkflowError::InvalidToken`] if the token is unknown, was already
    /// consumed, or no longer matches the application
    #[instrument(skip(self, token))]
    pub async fn resume(&self, token: &str, decision: ReviewDecision) -> WorkflowResult<Application> {
        let entry = self.correlator.consume(token).await?;
        let id = entry.application_id.clone();

        let recorded = self
            .continue_suspended(
                &entry,
                "resume",
                decision.review_state(),
                ApplicationMutation::transition(decision.review_state()).clear_resume_token(),
            )
            .await?;
        info!(application_id = %id, decision = %decision, "Review decision recorded");

        match decision {
            ReviewDecision::Approve => self.approve(&recorded.id).await,
            ReviewDecision::Reject => self.reject(&recorded.id).await,
        }
    }

    /// Terminate the review suspended under `token` because its deadline passed.
    #[instrument(skip(self, token))]
    pub async fn expire(&self, token: &str) -> WorkflowResult<Application> {
        let entry = self.correlator.consume(token).await?;
        let application = self
            .continue_suspended(
                &entry,
                "expire",
                ApplicationState::ReviewExpired,
                ApplicationMutation::transition(ApplicationState::ReviewExpired).clear_resume_token(),
            )
            .await?;
        metrics::counter!("accountflow_workflow_expired_total").increment(1);
        info!(application_id = %application.id, deadline = %entry.deadline, "Review expired");
        Ok(application)
    }

    /// Move a suspended application out of `PENDING_REVIEW` with a consumed entry.
    ///
    /// A stale entry (the application no longer waits on this token) is
    /// dropped. If the transition fails for any other reason the entry is
    /// put back so the call can be retried.
    async fn continue_suspended(
        &self,
        entry: &SuspendedExecution,
        operation: &'static str,
        target: ApplicationState,
        mutation: ApplicationMutation,
    ) -> WorkflowResult<Application> {
        let id = entry.application_id.as_str();
        let application = match self.load(id).await {
            Ok(application) => application,
            Err(e @ WorkflowError::NotFound(_)) => return Err(e),
            Err(e) => {
                self.restore_correlation(entry).await;
                return Err(e);
            }
        };

        // Suspended but not yet published by the flag step
        if application.state == ApplicationState::Validating {
            self.restore_correlation(entry).await;
            return Err(WorkflowError::InvalidToken(entry.resume_token.clone()));
        }

        let waiting_on_token = application.state == ApplicationState::PendingReview
            && application.resume_token.as_deref() == Some(entry.resume_token.as_str());
        if !waiting_on_token {
            warn!(
                application_id = %id,
                state = %application.state,
                operation,
                "Resume token no longer matches the application"
            );
            return Err(WorkflowError::InvalidToken(entry.resume_token.clone()));
        }

        match self.advance(id, operation, target, mutation).await {
            Ok(application) => Ok(application),
            Err(e) => {
                self.restore_correlation(entry).await;
                Err(e)
            }
        }
    }

    async fn restore_correlation(&self, entry: &SuspendedExecution) {
        if let Err(e) = self.correlator.reinstate(entry.clone()).await {
            warn!(
                application_id = %entry.application_id,
                error = %e,
                "Failed to reinstate resume token"
            );
        }
    }

    /// Move an application to `APPROVED`. Idempotent.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: &str) -> WorkflowResult<Application> {
        self.advance(
            id,
            "approve",
            ApplicationState::Approved,
            ApplicationMutation::transition(ApplicationState::Approved),
        )
        .await
    }

    /// Move an application to `REJECTED`. Idempotent.
    #[instrument(skip(self))]
    pub async fn reject(&self, id: &str) -> WorkflowResult<Application> {
        self.advance(
            id,
            "reject",
            ApplicationState::Rejected,
            ApplicationMutation::transition(ApplicationState::Rejected),
        )
        .await
    }

    pub async fn get(&self, id: &str) -> WorkflowResult<Application> {
        self.load(id).await
    }

    /// One page of applications in `state`.
    pub async fn find(
        &self,
        state: ApplicationState,
        pagination_key: Option<&PaginationKey>,
    ) -> WorkflowResult<Page> {
        let store = &self.store;
        let limit = self.config.find_page_size;
        Ok(self
            .with_store_retry("find_by_state", move |_| {
                store.find_by_state(state, pagination_key, Some(limit))
            })
            .await?)
    }

    /// Expire every review whose deadline is at or before `now`.
    ///
    /// ## Returns
    /// Number of applications moved to `REVIEW_EXPIRED`
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> WorkflowResult<usize> {
        let overdue = self
            .correlator
            .expired(now, self.config.find_page_size)
            .await?;

        let mut expired = 0;
        for entry in overdue {
            match self.expire(&entry.resume_token).await {
                Ok(_) => expired += 1,
                // Resumed or already expired concurrently
                Err(WorkflowError::InvalidToken(_)) => {
                    debug!(application_id = %entry.application_id, "Suspension already settled");
                }
                Err(e) => {
                    warn!(application_id = %entry.application_id, error = %e, "Failed to expire review");
                }
            }
        }
        Ok(expired)
    }

    /// Re-run validation for applications left in `VALIDATING` by an aborted
    /// or crashed execution.
    pub async fn recover_validating(&self, limit: usize) -> WorkflowResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for application in self.in_state(ApplicationState::Validating, limit).await? {
            match self.process(&application.id).await {
                Ok(_) => report.recovered += 1,
                Err(e) => {
                    warn!(application_id = %application.id, error = %e, "Recovery failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Apply the final transition for applications whose review decision was
    /// recorded but not yet applied.
    pub async fn recover_decided(&self, limit: usize) -> WorkflowResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for (state, decision) in [
            (ApplicationState::ReviewApproved, ReviewDecision::Approve),
            (ApplicationState::ReviewRejected, ReviewDecision::Reject),
        ] {
            for application in self.in_state(state, limit).await? {
                let result = match decision {
                    ReviewDecision::Approve => self.approve(&application.id).await,
                    ReviewDecision::Reject => self.reject(&application.id).await,
                };
                match result {
                    Ok(_) => report.recovered += 1,
                    Err(e) => {
                        warn!(application_id = %application.id, error = %e, "Recovery failed");
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn in_state(&self, state: ApplicationState, limit: usize) -> WorkflowResult<Vec<Application>> {
        let store = &self.store;
        let page = self
            .with_store_retry("find_by_state", move |_| {
                store.find_by_state(state, None, Some(limit))
            })
            .await?;
        Ok(page.items)
    }

    /// Transition `id` to `target` through conditional updates.
    ///
    /// Returns the current record without writing when it is already in
    /// `target`. A version conflict re-reads the record and tries again.
    async fn advance(
        &self,
        id: &str,
        operation: &'static str,
        target: ApplicationState,
        mutation: ApplicationMutation,
    ) -> WorkflowResult<Application> {
        for _ in 0..MAX_RECONCILE_ATTEMPTS {
            let current = self.load(id).await?;
            if current.state == target {
                debug!(application_id = %id, state = %target, operation, "Step already applied");
                return Ok(current);
            }
            if !current.state.can_transition_to(target) {
                return Err(WorkflowError::InvalidState {
                    id: id.to_string(),
                    state: current.state,
                    operation,
                });
            }

            let store = &self.store;
            let version = current.version;
            let attempt = mutation.clone();
            match self
                .with_store_retry("conditional_update", move |_| {
                    store.conditional_update(id, version, attempt.clone())
                })
                .await
            {
                Ok(updated) => {
                    metrics::counter!(
                        "accountflow_workflow_transitions_total",
                        "from" => current.state.as_str(),
                        "to" => target.as_str()
                    )
                    .increment(1);
                    info!(
                        application_id = %id,
                        from = %current.state,
                        state = %updated.state,
                        version = updated.version,
                        "Application transitioned"
                    );
                    return Ok(updated);
                }
                Err(StoreError::VersionConflict { expected, actual, .. }) => {
                    debug!(application_id = %id, expected, actual, operation, "Version conflict; re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(WorkflowError::ConcurrentUpdate(id.to_string()))
    }

    async fn create_record(&self, attrs: NewApplication) -> WorkflowResult<Application> {
        let record = Application::submitted(new_application_id(), attrs, Utc::now());
        let store = &self.store;
        let id = record.id.as_str();
        let result = self
            .with_store_retry("insert", |_| store.insert(record.clone()))
            .await;
        match result {
            Ok(application) => Ok(application),
            // An earlier attempt may have been written before it reported a failure
            Err(StoreError::DuplicateKey(_)) => {
                let existing = self.load(id).await?;
                if existing.name == record.name && existing.address == record.address {
                    Ok(existing)
                } else {
                    Err(WorkflowError::Store(StoreError::DuplicateKey(id.to_string())))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: &str) -> WorkflowResult<Application> {
        let store = &self.store;
        Ok(self.with_store_retry("get", move |_| store.get(id)).await?)
    }

    async fn with_store_retry<T, F, Fut>(&self, operation: &str, op: F) -> StoreResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        retry_with_backoff(&self.config.store_retry, operation, StoreError::is_transient, op)
            .await
            .map_err(|failure| failure.error)
    }
}

/// Reason recorded when at least one check flagged, listing every flagged
/// check in check order.
fn review_reason(outcomes: &[CheckOutcome]) -> Option<String> {
    let flagged: Vec<&str> = outcomes
        .iter()
        .filter(|outcome| outcome.flagged)
        .map(|outcome| outcome.check.as_str())
        .collect();
    if flagged.is_empty() {
        None
    } else {
        Some(format!("Flagged for review by {}", flagged.join(", ")))
    }
}
