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

//! Failure handling: compensation, transient retries, aborted validation,
//! recovery and review expiry.

use accountflow_checks::{BuiltinEvaluator, CheckError, CheckEvaluator, CheckKind};
use accountflow_common::{Application, ApplicationState, NewApplication, RetryPolicy};
use accountflow_store::{
    ApplicationMutation, ApplicationStore, InMemoryApplicationStore, Page, PaginationKey,
    StoreError, StoreResult,
};
use accountflow_workflow::*;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store that fails selected operations with `Unavailable`.
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryApplicationStore,
    /// Every update into this state fails
    fail_transition_to: std::sync::Mutex<Option<ApplicationState>>,
    /// Number of upcoming `get` calls that fail
    failing_gets: AtomicU32,
    /// Number of upcoming `conditional_update` calls that fail after writing
    lost_update_acks: AtomicU32,
}

impl FaultyStore {
    fn fail_transitions_to(&self, state: Option<ApplicationState>) {
        *self.fail_transition_to.lock().unwrap() = state;
    }
}

#[async_trait]
impl ApplicationStore for FaultyStore {
    async fn insert(&self, application: Application) -> StoreResult<Application> {
        self.inner.insert(application).await
    }

    async fn get(&self, id: &str) -> StoreResult<Application> {
        if self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.get(id).await
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutation: ApplicationMutation,
    ) -> StoreResult<Application> {
        let failing = *self.fail_transition_to.lock().unwrap();
        if mutation.state.is_some() && mutation.state == failing {
            return Err(StoreError::Unavailable("throttled".to_string()));
        }
        let result = self.inner.conditional_update(id, expected_version, mutation).await;
        if result.is_ok()
            && self
                .lost_update_acks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Unavailable("timeout waiting for ack".to_string()));
        }
        result
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.inner.delete(id).await
    }

    async fn find_by_state(
        &self,
        state: ApplicationState,
        pagination_key: Option<&PaginationKey>,
        limit: Option<usize>,
    ) -> StoreResult<Page> {
        self.inner.find_by_state(state, pagination_key, limit).await
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

/// Address check is unavailable while `down` is set.
struct OutageEvaluator {
    down: AtomicBool,
    calls: AtomicU32,
}

#[async_trait]
impl CheckEvaluator for OutageEvaluator {
    async fn evaluate(&self, check: CheckKind, input: &str) -> Result<bool, CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if check == CheckKind::Address && self.down.load(Ordering::SeqCst) {
            return Err(CheckError::Transient("address service unavailable".to_string()));
        }
        BuiltinEvaluator.evaluate(check, input).await
    }
}

fn fast_config() -> WorkflowConfig {
    WorkflowConfig::default()
        .with_check_retry(RetryPolicy::immediate(3))
        .with_store_retry(RetryPolicy::immediate(3))
}

#[tokio::test]
async fn test_failed_start_deletes_record() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FaultyStore::default());
    store.fail_transitions_to(Some(ApplicationState::Validating));
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );

    let err = orchestrator
        .submit(NewApplication::new("Alice", "123 Main St"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Store(StoreError::Unavailable(_))));
    assert!(err.is_retryable());

    // No partial record remains
    assert!(store.inner.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FaultyStore::default());
    store.failing_gets.store(2, Ordering::SeqCst);
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );

    let app = orchestrator
        .submit(NewApplication::new("Alice", "123 Main St"))
        .await?;
    assert_eq!(app.state, ApplicationState::Approved);
    Ok(())
}

#[tokio::test]
async fn test_lost_write_ack_is_reconciled() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FaultyStore::default());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );

    let app = orchestrator
        .start(NewApplication::new("Alice", "123 Main St"))
        .await?;
    // The approval is written but reported as failed; the retry then hits a
    // version conflict and the re-read shows the step already applied.
    store.lost_update_acks.store(1, Ordering::SeqCst);
    let app = orchestrator.process(&app.id).await?;
    assert_eq!(app.state, ApplicationState::Approved);
    assert_eq!(app.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_transient_check_failures_are_retried() -> Result<(), Box<dyn std::error::Error>> {
    struct FlakyOnce {
        failed: AtomicBool,
    }

    #[async_trait]
    impl CheckEvaluator for FlakyOnce {
        async fn evaluate(&self, check: CheckKind, input: &str) -> Result<bool, CheckError> {
            if check == CheckKind::Name && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(CheckError::Transient("cold start".to_string()));
            }
            BuiltinEvaluator.evaluate(check, input).await
        }
    }

    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryApplicationStore::new()),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(FlakyOnce {
            failed: AtomicBool::new(false),
        }),
        fast_config(),
    );

    let app = orchestrator
        .submit(NewApplication::new("Alice", "123 Main St"))
        .await?;
    assert_eq!(app.state, ApplicationState::Approved);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_check_retries_abort_and_recover() -> Result<(), Box<dyn std::error::Error>> {
    let evaluator = Arc::new(OutageEvaluator {
        down: AtomicBool::new(true),
        calls: AtomicU32::new(0),
    });
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryApplicationStore::new()),
        Arc::new(InMemoryResumeCorrelator::new()),
        evaluator.clone(),
        fast_config(),
    );

    // Durably started, then validation aborts: the caller sees the failure
    let err = orchestrator
        .submit(NewApplication::new("Alice", "123 Main St"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation(accountflow_checks::ValidationError::Transient { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    // 1 name call + 3 address attempts
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 4);

    // ...and the last committed state stands
    let validating = orchestrator.find(ApplicationState::Validating, None).await?;
    assert_eq!(validating.items.len(), 1);
    let app = validating.items[0].clone();
    assert_eq!(app.version, 1);

    let err = orchestrator.process(&app.id).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Validation(accountflow_checks::ValidationError::Transient { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(orchestrator.get(&app.id).await?.state, ApplicationState::Validating);

    let report = orchestrator.recover_validating(10).await?;
    assert_eq!(report, RecoveryReport { recovered: 0, failed: 1 });

    evaluator.down.store(false, Ordering::SeqCst);
    let report = orchestrator.recover_validating(10).await?;
    assert_eq!(report, RecoveryReport { recovered: 1, failed: 0 });
    assert_eq!(orchestrator.get(&app.id).await?.state, ApplicationState::Approved);
    Ok(())
}

#[tokio::test]
async fn test_failed_final_transition_is_recovered() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FaultyStore::default());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );

    let app = orchestrator
        .submit(NewApplication::new("evil Bob", "1 Main St"))
        .await?;

    store.fail_transitions_to(Some(ApplicationState::Rejected));
    let err = orchestrator
        .submit_review_decision(&app.id, "REJECT")
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    // The decision itself is committed and the token consumed
    let decided = orchestrator.get(&app.id).await?;
    assert_eq!(decided.state, ApplicationState::ReviewRejected);
    assert!(decided.resume_token.is_none());

    store.fail_transitions_to(None);
    let report = orchestrator.recover_decided(10).await?;
    assert_eq!(report.recovered, 1);
    assert_eq!(orchestrator.get(&app.id).await?.state, ApplicationState::Rejected);
    Ok(())
}

#[tokio::test]
async fn test_failed_resume_reinstates_token() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FaultyStore::default());
    let correlator = InMemoryResumeCorrelator::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(correlator.clone()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );

    let app = orchestrator
        .submit(NewApplication::new("evil Bob", "1 Main St"))
        .await?;
    let token = app.resume_token.clone().ok_or("missing token")?;

    store.fail_transitions_to(Some(ApplicationState::ReviewApproved));
    assert!(orchestrator.resume(&token, ReviewDecision::Approve).await.is_err());
    assert_eq!(orchestrator.get(&app.id).await?, app);
    assert!(correlator.peek(&token).await?.is_some());

    store.fail_transitions_to(None);
    let approved = orchestrator.resume(&token, ReviewDecision::Approve).await?;
    assert_eq!(approved.state, ApplicationState::Approved);
    Ok(())
}

#[tokio::test]
async fn test_failed_suspension_discards_token() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(FaultyStore::default());
    store.fail_transitions_to(Some(ApplicationState::PendingReview));
    let correlator = InMemoryResumeCorrelator::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(correlator.clone()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );

    let err = orchestrator
        .submit(NewApplication::new("evil Bob", "1 Main St"))
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let validating = orchestrator.find(ApplicationState::Validating, None).await?;
    assert_eq!(validating.items.len(), 1);
    assert!(validating.items[0].resume_token.is_none());
    assert!(correlator.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_overdue_review_expires() -> Result<(), Box<dyn std::error::Error>> {
    let correlator = InMemoryResumeCorrelator::new();
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryApplicationStore::new()),
        Arc::new(correlator.clone()),
        Arc::new(BuiltinEvaluator),
        fast_config().with_review_timeout(Duration::from_secs(60)),
    );

    let app = orchestrator
        .submit(NewApplication::new("evil Bob", "1 Main St"))
        .await?;
    let token = app.resume_token.clone().ok_or("missing token")?;

    assert_eq!(orchestrator.expire_overdue(Utc::now()).await?, 0);
    let later = Utc::now() + chrono::Duration::seconds(61);
    assert_eq!(orchestrator.expire_overdue(later).await?, 1);

    let expired = orchestrator.get(&app.id).await?;
    assert_eq!(expired.state, ApplicationState::ReviewExpired);
    assert!(expired.resume_token.is_none());
    assert!(expired.state.is_terminal());

    // A late decision finds nothing to resume
    let err = orchestrator
        .resume(&token, ReviewDecision::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidToken(_)));
    let err = orchestrator
        .submit_review_decision(&app.id, "APPROVE")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState { .. }));
    assert!(correlator.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_expire_after_resume_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryApplicationStore::new()),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(BuiltinEvaluator),
        fast_config(),
    );
    let app = orchestrator
        .submit(NewApplication::new("evil Bob", "1 Main St"))
        .await?;
    let token = app.resume_token.clone().ok_or("missing token")?;

    orchestrator.submit_review_decision(&app.id, "APPROVE").await?;
    let err = orchestrator.expire(&token).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidToken(_)));
    assert_eq!(orchestrator.get(&app.id).await?.state, ApplicationState::Approved);
    Ok(())
}
