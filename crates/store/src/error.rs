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

//! Error types for application store operations.

use accountflow_common::{ApplicationState, UnknownStateError};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No record with this id
    #[error("Application not found: {0}")]
    NotFound(String),

    /// A record with this id already exists
    #[error("Application already exists: {0}")]
    DuplicateKey(String),

    /// Optimistic locking failure: a concurrent writer won
    #[error("Version conflict on {id}: expected {expected}, actual {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    /// Mutation would leave the lifecycle graph
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ApplicationState,
        to: ApplicationState,
    },

    /// Pagination key was not produced by this store
    #[error("Invalid pagination key: {0}")]
    InvalidPaginationKey(String),

    /// Transient backend failure (connection, timeout, throttling)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Non-transient backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::DuplicateKey(_) => "duplicate_key",
            StoreError::VersionConflict { .. } => "version_conflict",
            StoreError::InvalidTransition { .. } => "invalid_transition",
            StoreError::InvalidPaginationKey(_) => "invalid_pagination_key",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Backend(_) => "backend",
            StoreError::Serialization(_) => "serialization",
            StoreError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<UnknownStateError> for StoreError {
    fn from(err: UnknownStateError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => StoreError::Backend(format!("SQL error: {}", db)),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => {
                StoreError::Serialization(format!("SQL decode error: {}", err))
            }
            sqlx::Error::Configuration(_) => StoreError::Config(format!("SQL config error: {}", err)),
            _ => StoreError::Unavailable(format!("SQL error: {}", err)),
        }
    }
}
