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

//! Concurrency tests: racing steps, racing decisions, observed state paths
//! and resumption from a separate orchestrator instance.

use accountflow_checks::BuiltinEvaluator;
use accountflow_common::{Application, ApplicationState, NewApplication};
use accountflow_store::{
    ApplicationMutation, ApplicationStore, InMemoryApplicationStore, Page, PaginationKey,
    SqlApplicationStore, StoreResult,
};
use accountflow_workflow::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Records every state each application is written in.
#[derive(Default)]
struct RecordingStore {
    inner: InMemoryApplicationStore,
    history: Mutex<HashMap<String, Vec<ApplicationState>>>,
}

impl RecordingStore {
    fn observe(&self, application: &Application) {
        self.history
            .lock()
            .unwrap()
            .entry(application.id.clone())
            .or_default()
            .push(application.state);
    }

    fn paths(&self) -> HashMap<String, Vec<ApplicationState>> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplicationStore for RecordingStore {
    async fn insert(&self, application: Application) -> StoreResult<Application> {
        let stored = self.inner.insert(application).await?;
        self.observe(&stored);
        Ok(stored)
    }

    async fn get(&self, id: &str) -> StoreResult<Application> {
        self.inner.get(id).await
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutation: ApplicationMutation,
    ) -> StoreResult<Application> {
        let stored = self.inner.conditional_update(id, expected_version, mutation).await?;
        self.observe(&stored);
        Ok(stored)
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
        "recording"
    }
}

fn in_memory_orchestrator() -> (Orchestrator, InMemoryResumeCorrelator) {
    let correlator = InMemoryResumeCorrelator::new();
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryApplicationStore::new()),
        Arc::new(correlator.clone()),
        Arc::new(BuiltinEvaluator),
        WorkflowConfig::default(),
    );
    (orchestrator, correlator)
}

#[tokio::test]
async fn test_racing_decisions_have_one_winner() -> Result<(), Box<dyn std::error::Error>> {
    let (orchestrator, correlator) = in_memory_orchestrator();
    let app = orchestrator
        .submit(NewApplication::new("evil Bob", "1 Main St"))
        .await?;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            let id = app.id.clone();
            let decision = if i % 2 == 0 { "APPROVE" } else { "REJECT" };
            tokio::spawn(async move { orchestrator.submit_review_decision(&id, decision).await })
        })
        .collect();

    let mut winners = Vec::new();
    for result in futures::future::join_all(handles).await {
        match result? {
            Ok(app) => winners.push(app),
            Err(e) => assert!(
                matches!(e, WorkflowError::InvalidToken(_) | WorkflowError::InvalidState { .. }),
                "unexpected error: {}",
                e
            ),
        }
    }

    assert_eq!(winners.len(), 1);
    let final_state = orchestrator.get(&app.id).await?.state;
    assert_eq!(final_state, winners[0].state);
    assert!(matches!(
        final_state,
        ApplicationState::Approved | ApplicationState::Rejected
    ));
    assert!(correlator.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_validation_is_applied_once() -> Result<(), Box<dyn std::error::Error>> {
    let (orchestrator, correlator) = in_memory_orchestrator();
    let app = orchestrator
        .start(NewApplication::new("evil Bob", "1 Main St"))
        .await?;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let id = app.id.clone();
            tokio::spawn(async move { orchestrator.process(&id).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for result in futures::future::join_all(handles).await {
        let processed = result??;
        assert_eq!(processed.state, ApplicationState::PendingReview);
        tokens.push(processed.resume_token.ok_or("missing token")?);
    }

    // Every duplicate converged on the single suspension that was committed
    let stored = orchestrator.get(&app.id).await?;
    assert_eq!(stored.version, 2);
    for token in &tokens {
        assert_eq!(Some(token), stored.resume_token.as_ref());
    }
    assert_eq!(correlator.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_observed_states_follow_the_lifecycle_graph() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RecordingStore::default());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(InMemoryResumeCorrelator::new()),
        Arc::new(BuiltinEvaluator),
        WorkflowConfig::default(),
    );

    let inputs = [
        ("Alice", "123 Main St"),
        ("evil Bob", "no street number"),
        ("UNPROCESSABLE_DATA", "123 Main St"),
        ("Dave", "Elm St"),
        ("evil Eve", "7 Oak Ave"),
    ];
    let mut handles = Vec::new();
    for (i, (name, address)) in inputs.into_iter().enumerate() {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            let app = orchestrator.submit(NewApplication::new(name, address)).await?;
            if app.state == ApplicationState::PendingReview {
                let decision = if i % 2 == 0 { "APPROVE" } else { "REJECT" };
                return orchestrator.submit_review_decision(&app.id, decision).await;
            }
            Ok(app)
        }));
    }
    for result in futures::future::join_all(handles).await {
        assert!(result??.state.is_terminal());
    }

    let paths = store.paths();
    assert_eq!(paths.len(), inputs.len());
    for (id, path) in paths {
        assert_eq!(path[0], ApplicationState::Submitted, "{} did not start SUBMITTED", id);
        assert_eq!(path[1], ApplicationState::Validating, "{} skipped VALIDATING", id);
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{}: {} -> {} is not a lifecycle edge",
                id,
                pair[0],
                pair[1]
            );
        }
        assert!(path.last().map(|s| s.is_terminal()).unwrap_or(false));
    }
    Ok(())
}

#[tokio::test]
async fn test_resume_from_another_instance() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("accountflow.db");
    let path = path.to_str().ok_or("non-utf8 path")?;

    async fn instance(path: &str) -> Result<Orchestrator, Box<dyn std::error::Error>> {
        Ok(Orchestrator::new(
            Arc::new(SqlApplicationStore::new_sqlite(path).await?),
            Arc::new(SqlResumeCorrelator::new_sqlite(path).await?),
            Arc::new(BuiltinEvaluator),
            WorkflowConfig::default(),
        ))
    }

    let id = {
        let submitter = instance(path).await?;
        let app = submitter
            .submit(NewApplication::new("evil Bob", "no street number"))
            .await?;
        assert_eq!(app.state, ApplicationState::PendingReview);
        app.id
    };

    // A completely separate invocation delivers the decision
    let reviewer = instance(path).await?;
    let pending = reviewer.find(ApplicationState::PendingReview, None).await?;
    assert_eq!(pending.items.len(), 1);
    assert_eq!(pending.items[0].id, id);

    let app = reviewer.submit_review_decision(&id, "REJECT").await?;
    assert_eq!(app.state, ApplicationState::Rejected);
    assert!(reviewer.find(ApplicationState::PendingReview, None).await?.items.is_empty());
    Ok(())
}
