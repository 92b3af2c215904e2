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

//! In-memory application store.

use crate::{
    effective_limit, record_operation, ApplicationMutation, ApplicationStore, Page,
    PaginationKey, StoreError, StoreResult,
};
use accountflow_common::{Application, ApplicationState};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

const BACKEND: &str = "memory";

/// In-memory store keyed by id.
///
/// A `BTreeMap` keeps records in id order, which is also the order of
/// the state lookup. All updates happen under a single write lock, so
/// the version check and the write are atomic.
#[derive(Clone, Default)]
pub struct InMemoryApplicationStore {
    records: Arc<RwLock<BTreeMap<String, Application>>>,
}

impl InMemoryApplicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryApplicationStore {
    async fn insert(&self, application: Application) -> StoreResult<Application> {
        let start = Instant::now();
        let application = application.truncated_to_millis();
        let result = {
            let mut records = self.records.write().await;
            if records.contains_key(&application.id) {
                Err(StoreError::DuplicateKey(application.id.clone()))
            } else {
                records.insert(application.id.clone(), application.clone());
                Ok(application)
            }
        };
        record_operation(BACKEND, "insert", start, &result);
        result
    }

    async fn get(&self, id: &str) -> StoreResult<Application> {
        let start = Instant::now();
        let result = self
            .records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()));
        record_operation(BACKEND, "get", start, &result);
        result
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutation: ApplicationMutation,
    ) -> StoreResult<Application> {
        let start = Instant::now();
        let result = {
            let mut records = self.records.write().await;
            match records.get_mut(id) {
                None => Err(StoreError::NotFound(id.to_string())),
                Some(current) if current.version != expected_version => {
                    Err(StoreError::VersionConflict {
                        id: id.to_string(),
                        expected: expected_version,
                        actual: current.version,
                    })
                }
                Some(current) => mutation.apply(current, Utc::now()).map(|next| {
                    *current = next.clone();
                    next
                }),
            }
        };
        if let Ok(app) = &result {
            debug!(application_id = %id, state = %app.state, version = app.version, "Application updated");
        }
        record_operation(BACKEND, "conditional_update", start, &result);
        result
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let start = Instant::now();
        let result = self
            .records
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()));
        record_operation(BACKEND, "delete", start, &result);
        result
    }

    async fn find_by_state(
        &self,
        state: ApplicationState,
        pagination_key: Option<&PaginationKey>,
        limit: Option<usize>,
    ) -> StoreResult<Page> {
        let start = Instant::now();
        let limit = effective_limit(limit);
        let lower = match pagination_key {
            Some(key) => Bound::Excluded(key.as_str().to_string()),
            None => Bound::Unbounded,
        };

        let items: Vec<Application> = self
            .records
            .read()
            .await
            .range((lower, Bound::Unbounded))
            .map(|(_, app)| app)
            .filter(|app| app.state == state)
            .take(limit + 1)
            .cloned()
            .collect();

        let result = Ok(Page::from_overfetch(items, limit));
        record_operation(BACKEND, "find_by_state", start, &result);
        result
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accountflow_common::NewApplication;

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = InMemoryApplicationStore::new();
        let app = store
            .create(NewApplication::new("Alice", "123 Main St"))
            .await
            .unwrap();
        assert_eq!(store.get(&app.id).await.unwrap(), app);

        store.delete(&app.id).await.unwrap();
        assert!(matches!(store.get(&app.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(&app.id).await, Err(StoreError::NotFound(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = InMemoryApplicationStore::new();
        let app = store.create(NewApplication::new("Alice", "1 A St")).await.unwrap();

        let mutation = ApplicationMutation::transition(ApplicationState::Validating);
        let updated = store
            .conditional_update(&app.id, 0, mutation.clone())
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        let err = store.conditional_update(&app.id, 0, mutation).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionConflict {
                id: app.id.clone(),
                expected: 0,
                actual: 1
            }
        );
    }
}
