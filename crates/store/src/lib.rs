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

//! # AccountFlow Application Store
//!
//! ## Purpose
//! Durable, keyed storage for [`Application`] records with point lookups,
//! optimistic-concurrency updates and a paginated secondary lookup by state.
//!
//! ## Design
//! - **Single mutation path**: [`ApplicationStore::conditional_update`] writes only
//!   when the stored version equals the caller's expected version
//! - **Mutations are data**: [`ApplicationMutation`] is applied identically by
//!   every backend and validates the lifecycle transition
//! - **Opaque pagination**: [`PaginationKey`] must be passed back verbatim
//!
//! ## Backends
//! - [`InMemoryApplicationStore`]: tests and embedded use
//! - [`SqlApplicationStore`]: SQLite (embedded/testing) and PostgreSQL (production)
//! - `DynamoDBApplicationStore`: DynamoDB with a `state` GSI (feature `ddb-backend`)

pub mod config;
pub mod error;
pub mod memory;
pub mod sql;

#[cfg(feature = "ddb-backend")]
pub mod ddb;

pub use config::{create_store_from_config, create_store_from_env, BackendType, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryApplicationStore;
pub use sql::SqlApplicationStore;

#[cfg(feature = "ddb-backend")]
pub use ddb::DynamoDBApplicationStore;

use accountflow_common::{
    new_application_id, truncate_to_millis, Application, ApplicationState, NewApplication,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Page size used when the caller does not pass a limit.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Largest page a single `find_by_state` call returns.
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Update of an optional field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    /// Leave the current value
    #[default]
    Keep,
    /// Replace with a new value
    Set(T),
    /// Remove the value
    Clear,
}

impl<T: Clone> FieldUpdate<T> {
    fn apply(&self, current: Option<T>) -> Option<T> {
        match self {
            FieldUpdate::Keep => current,
            FieldUpdate::Set(value) => Some(value.clone()),
            FieldUpdate::Clear => None,
        }
    }
}

/// Change applied by [`ApplicationStore::conditional_update`].
///
/// `id`, `name` and `address` are immutable and cannot be mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplicationMutation {
    /// Target state; must be a successor of the current state
    pub state: Option<ApplicationState>,
    pub reason: FieldUpdate<String>,
    pub resume_token: FieldUpdate<String>,
}

impl ApplicationMutation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `state`.
    pub fn transition(state: ApplicationState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = FieldUpdate::Set(reason.into());
        self
    }

    pub fn clear_reason(mut self) -> Self {
        self.reason = FieldUpdate::Clear;
        self
    }

    pub fn with_resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = FieldUpdate::Set(token.into());
        self
    }

    pub fn clear_resume_token(mut self) -> Self {
        self.resume_token = FieldUpdate::Clear;
        self
    }

    /// Produce the successor record of `current`.
    ///
    /// ## Errors
    /// [`StoreError::InvalidTransition`] if the target state is not reachable
    /// from `current.state` in one step
    pub fn apply(&self, current: &Application, now: DateTime<Utc>) -> StoreResult<Application> {
        let mut next = current.clone();
        if let Some(state) = self.state {
            if !current.state.can_transition_to(state) {
                return Err(StoreError::InvalidTransition {
                    id: current.id.clone(),
                    from: current.state,
                    to: state,
                });
            }
            next.state = state;
        }
        next.reason = self.reason.apply(current.reason.clone());
        next.resume_token = self.resume_token.apply(current.resume_token.clone());
        next.version = current.version + 1;
        next.updated_at = truncate_to_millis(now);
        Ok(next)
    }
}

/// Opaque continuation key of a [`Page`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaginationKey(String);

impl PaginationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PaginationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A page of applications in index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Application>,
    /// Absent when there are no further items
    pub next_pagination_key: Option<PaginationKey>,
}

impl Page {
    /// Build a page from up to `limit + 1` items in index order; the extra
    /// item only signals that another page exists.
    pub(crate) fn from_overfetch(mut items: Vec<Application>, limit: usize) -> Self {
        let next_pagination_key = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|app| PaginationKey::new(app.id.clone()))
        } else {
            None
        };
        Self {
            items,
            next_pagination_key,
        }
    }
}

/// Clamp a caller-provided page size to `1..=MAX_PAGE_LIMIT`.
pub fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Durable application record storage.
///
/// ## Invariants
/// - `id` is unique and never reused
/// - Every successful update increments `version` by exactly one
/// - There is no unconditional overwrite
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Assign a fresh id and persist a `SUBMITTED` record with version 0.
    async fn create(&self, attrs: NewApplication) -> StoreResult<Application> {
        let application = Application::submitted(new_application_id(), attrs, Utc::now());
        self.insert(application).await
    }

    /// Persist a new record as given.
    ///
    /// ## Errors
    /// [`StoreError::DuplicateKey`] if the id already exists
    async fn insert(&self, application: Application) -> StoreResult<Application>;

    /// ## Errors
    /// [`StoreError::NotFound`] if absent
    async fn get(&self, id: &str) -> StoreResult<Application>;

    /// Apply `mutation` only if the stored version equals `expected_version`.
    ///
    /// ## Returns
    /// The stored record with `version = expected_version + 1`
    ///
    /// ## Errors
    /// - [`StoreError::VersionConflict`] if a concurrent writer won
    /// - [`StoreError::InvalidTransition`] if the mutation leaves the lifecycle graph
    /// - [`StoreError::NotFound`] if absent
    async fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutation: ApplicationMutation,
    ) -> StoreResult<Application>;

    /// Remove a record. Used only to compensate a failed workflow start.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Page through applications in `state`, ascending by id.
    async fn find_by_state(
        &self,
        state: ApplicationState,
        pagination_key: Option<&PaginationKey>,
        limit: Option<usize>,
    ) -> StoreResult<Page>;

    /// Backend label for logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Record duration and outcome of a store operation.
pub(crate) fn record_operation<T>(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    result: &StoreResult<T>,
) {
    metrics::histogram!(
        "accountflow_store_operation_duration_seconds",
        "backend" => backend,
        "operation" => operation
    )
    .record(start.elapsed().as_secs_f64());

    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.label(),
    };
    metrics::counter!(
        "accountflow_store_operations_total",
        "backend" => backend,
        "operation" => operation,
        "result" => outcome
    )
    .increment(1);
}
