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

//! # Resume Correlator
//!
//! ## Purpose
//! Maps one-shot resume tokens to suspended review executions so that an
//! out-of-band decision can be delivered to exactly one waiting workflow.
//!
//! ## Design
//! - **One-shot**: [`ResumeCorrelator::consume`] removes the entry atomically;
//!   a second consume of the same token fails with `InvalidToken`
//! - **Deadline**: every entry carries the instant after which the expiry
//!   monitor may reclaim it
//! - **Reinstate**: an entry consumed by a request that then failed transiently
//!   can be put back so the reviewer can retry

pub mod memory;
pub mod sql;

pub use memory::InMemoryResumeCorrelator;
pub use sql::SqlResumeCorrelator;

use accountflow_common::truncate_to_millis;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use ulid::Ulid;

/// Prefix of every resume token.
pub const RESUME_TOKEN_PREFIX: &str = "resume_";

/// Generate a fresh unguessable resume token.
pub fn new_resume_token() -> String {
    format!("{}{}", RESUME_TOKEN_PREFIX, Ulid::new())
}

/// Result type for correlator operations.
pub type CorrelatorResult<T> = Result<T, CorrelatorError>;

/// Correlator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorError {
    /// Token unknown or already consumed
    #[error("Unknown or already used resume token: {0}")]
    InvalidToken(String),

    /// Reinstate found a live entry under the same token
    #[error("Resume token already registered: {0}")]
    DuplicateToken(String),

    /// Transient backend failure
    #[error("Correlator unavailable: {0}")]
    Unavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CorrelatorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CorrelatorError::Unavailable(_))
    }
}

impl From<sqlx::Error> for CorrelatorError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => CorrelatorError::Backend(format!("SQL error: {}", db)),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => {
                CorrelatorError::Serialization(format!("SQL decode error: {}", err))
            }
            sqlx::Error::Configuration(_) => {
                CorrelatorError::Config(format!("SQL config error: {}", err))
            }
            _ => CorrelatorError::Unavailable(format!("SQL error: {}", err)),
        }
    }
}

/// A workflow execution parked until a review decision arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedExecution {
    pub resume_token: String,
    pub application_id: String,
    pub awaiting_since: DateTime<Utc>,
    /// Past this instant the entry is eligible for expiry
    pub deadline: DateTime<Utc>,
}

impl SuspendedExecution {
    /// Build an entry with a fresh token.
    pub fn new(application_id: impl Into<String>, now: DateTime<Utc>, timeout: Duration) -> Self {
        let now = truncate_to_millis(now);
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        Self {
            resume_token: new_resume_token(),
            application_id: application_id.into(),
            awaiting_since: now,
            deadline: truncate_to_millis(
                now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }
}

/// Token-to-execution correlation table.
#[async_trait]
pub trait ResumeCorrelator: Send + Sync {
    /// Register a suspended execution for `application_id` and return it.
    async fn suspend(
        &self,
        application_id: &str,
        timeout: Duration,
    ) -> CorrelatorResult<SuspendedExecution>;

    /// Atomically remove and return the entry for `token`.
    ///
    /// ## Errors
    /// [`CorrelatorError::InvalidToken`] if the token is unknown or was
    /// already consumed
    async fn consume(&self, token: &str) -> CorrelatorResult<SuspendedExecution>;

    /// Remove an entry without delivering a decision. Missing tokens are ignored.
    async fn cancel(&self, token: &str) -> CorrelatorResult<()>;

    /// Put a previously consumed entry back.
    async fn reinstate(&self, entry: SuspendedExecution) -> CorrelatorResult<()>;

    /// Look up an entry without consuming it.
    async fn peek(&self, token: &str) -> CorrelatorResult<Option<SuspendedExecution>>;

    /// Entries whose deadline is at or before `now`, oldest deadline first.
    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> CorrelatorResult<Vec<SuspendedExecution>>;

    fn backend_name(&self) -> &'static str;
}
