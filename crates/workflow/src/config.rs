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

//! Workflow and correlator configuration.
//!
//! ## Environment Variables
//!
//! ### Workflow
//! - `ACCOUNTFLOW_REVIEW_TIMEOUT_SECS`: Review deadline (default: 300)
//! - `ACCOUNTFLOW_CHECK_MAX_ATTEMPTS`: Attempts per check (default: 3)
//! - `ACCOUNTFLOW_CHECK_INITIAL_BACKOFF_MS`: First check retry backoff (default: 100)
//! - `ACCOUNTFLOW_STORE_MAX_ATTEMPTS`: Attempts per store call (default: 3)
//! - `ACCOUNTFLOW_EXPIRY_SWEEP_INTERVAL_MS`: Expiry monitor period (default: 1000)
//! - `ACCOUNTFLOW_FIND_PAGE_SIZE`: Page size for `find` and recovery (default: 100)
//!
//! ### Correlator
//! - `ACCOUNTFLOW_CORRELATOR_BACKEND`: "memory" (default) | "sqlite" | "postgres"
//! - SQLite path and PostgreSQL URL are shared with the store:
//!   `ACCOUNTFLOW_STORE_SQLITE_PATH`, `ACCOUNTFLOW_STORE_POSTGRES_URL`,
//!   `ACCOUNTFLOW_STORE_POSTGRES_POOL_SIZE`

use crate::correlator::{
    CorrelatorError, CorrelatorResult, InMemoryResumeCorrelator, ResumeCorrelator,
    SqlResumeCorrelator,
};
use accountflow_common::{env_opt, env_or, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default review deadline.
pub const DEFAULT_REVIEW_TIMEOUT: Duration = Duration::from_secs(300);

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// How long a suspended review waits for a decision
    pub review_timeout: Duration,
    /// Retry policy for transient check failures
    pub check_retry: RetryPolicy,
    /// Retry policy for transient store failures
    pub store_retry: RetryPolicy,
    /// Period of the expiry monitor
    pub expiry_sweep_interval: Duration,
    /// Page size for `find`, recovery and expiry sweeps
    pub find_page_size: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            review_timeout: DEFAULT_REVIEW_TIMEOUT,
            check_retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(100)),
            store_retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_backoff(Duration::from_millis(100)),
            expiry_sweep_interval: Duration::from_millis(1000),
            find_page_size: 100,
        }
    }
}

impl WorkflowConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            review_timeout: Duration::from_secs(env_or(
                "ACCOUNTFLOW_REVIEW_TIMEOUT_SECS",
                defaults.review_timeout.as_secs(),
            )),
            check_retry: defaults
                .check_retry
                .with_max_attempts(env_or("ACCOUNTFLOW_CHECK_MAX_ATTEMPTS", 3))
                .with_initial_backoff(Duration::from_millis(env_or(
                    "ACCOUNTFLOW_CHECK_INITIAL_BACKOFF_MS",
                    100,
                ))),
            store_retry: defaults
                .store_retry
                .with_max_attempts(env_or("ACCOUNTFLOW_STORE_MAX_ATTEMPTS", 3)),
            expiry_sweep_interval: Duration::from_millis(env_or(
                "ACCOUNTFLOW_EXPIRY_SWEEP_INTERVAL_MS",
                1000,
            )),
            find_page_size: env_or("ACCOUNTFLOW_FIND_PAGE_SIZE", 100usize).max(1),
        }
    }

    pub fn with_review_timeout(mut self, review_timeout: Duration) -> Self {
        self.review_timeout = review_timeout;
        self
    }

    pub fn with_check_retry(mut self, check_retry: RetryPolicy) -> Self {
        self.check_retry = check_retry;
        self
    }

    pub fn with_store_retry(mut self, store_retry: RetryPolicy) -> Self {
        self.store_retry = store_retry;
        self
    }

    pub fn with_expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval = interval;
        self
    }
}

/// Correlator backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CorrelatorBackend {
    /// Process-local table; entries do not survive a restart
    #[default]
    InMemory,
    Sqlite {
        path: String,
    },
    PostgreSQL {
        connection_string: String,
        pool_size: u32,
    },
}

impl CorrelatorBackend {
    /// Read `ACCOUNTFLOW_CORRELATOR_BACKEND` and the shared SQL settings.
    pub fn from_env() -> CorrelatorResult<Self> {
        let backend = env_opt("ACCOUNTFLOW_CORRELATOR_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase();

        match backend.as_str() {
            "in-memory" | "memory" => Ok(CorrelatorBackend::InMemory),
            "sqlite" => Ok(CorrelatorBackend::Sqlite {
                path: env_opt("ACCOUNTFLOW_STORE_SQLITE_PATH").unwrap_or_else(|| ":memory:".to_string()),
            }),
            "postgres" | "postgresql" => {
                let connection_string = env_opt("ACCOUNTFLOW_STORE_POSTGRES_URL").ok_or_else(|| {
                    CorrelatorError::Config("ACCOUNTFLOW_STORE_POSTGRES_URL not set".to_string())
                })?;
                Ok(CorrelatorBackend::PostgreSQL {
                    connection_string,
                    pool_size: env_or("ACCOUNTFLOW_STORE_POSTGRES_POOL_SIZE", 10),
                })
            }
            other => Err(CorrelatorError::Config(format!(
                "Unknown correlator backend: {}. Valid options: memory, sqlite, postgres",
                other
            ))),
        }
    }
}

/// Create a resume correlator for the given backend.
pub async fn create_correlator(backend: &CorrelatorBackend) -> CorrelatorResult<Arc<dyn ResumeCorrelator>> {
    let correlator: Arc<dyn ResumeCorrelator> = match backend {
        CorrelatorBackend::InMemory => Arc::new(InMemoryResumeCorrelator::new()),
        CorrelatorBackend::Sqlite { path } => Arc::new(SqlResumeCorrelator::new_sqlite(path).await?),
        CorrelatorBackend::PostgreSQL {
            connection_string,
            pool_size,
        } => Arc::new(SqlResumeCorrelator::new_postgres(connection_string, *pool_size).await?),
    };
    info!(backend = correlator.backend_name(), "Resume correlator created");
    Ok(correlator)
}
