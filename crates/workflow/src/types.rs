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

//! Workflow types: review decisions, flags and the workflow error taxonomy.

use crate::correlator::CorrelatorError;
use accountflow_checks::ValidationError;
use accountflow_common::ApplicationState;
use accountflow_store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Workflow error types
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Store operation failed
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Correlation table operation failed
    #[error("Correlator error: {0}")]
    Correlator(CorrelatorError),

    /// Validation could not complete (exhausted retries or aborted check)
    #[error("Validation failed: {0}")]
    Validation(ValidationError),

    /// Decision is neither APPROVE nor REJECT
    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    /// Flag type is neither REVIEW nor UNPROCESSABLE_DATA
    #[error("Invalid flag type: {0}")]
    InvalidFlagType(String),

    /// Unknown, already consumed or stale resume token
    #[error("Invalid resume token: {0}")]
    InvalidToken(String),

    /// Operation does not apply to the application's current state
    #[error("Application {id} is {state}; cannot {operation}")]
    InvalidState {
        id: String,
        state: ApplicationState,
        operation: &'static str,
    },

    /// Application not found
    #[error("Application not found: {0}")]
    NotFound(String),

    /// Concurrent writers kept winning after all reconciliation attempts
    #[error("Concurrent update: {0}")]
    ConcurrentUpdate(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Stable classification of [`WorkflowError`] for request adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller sent a malformed request
    InvalidInput,
    /// Resume token cannot be used
    InvalidToken,
    /// Application does not exist
    NotFound,
    /// Request conflicts with the current state
    InvalidState,
    /// Transient failure; the same request may succeed later
    Unavailable,
    /// Anything else
    Internal,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::InvalidDecision(_) | WorkflowError::InvalidFlagType(_) => {
                ErrorKind::InvalidInput
            }
            WorkflowError::InvalidToken(_) => ErrorKind::InvalidToken,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::InvalidState { .. } | WorkflowError::ConcurrentUpdate(_) => {
                ErrorKind::InvalidState
            }
            WorkflowError::Store(e) if e.is_transient() => ErrorKind::Unavailable,
            WorkflowError::Correlator(e) if e.is_transient() => ErrorKind::Unavailable,
            WorkflowError::Validation(ValidationError::Transient { .. }) => ErrorKind::Unavailable,
            WorkflowError::Store(_)
            | WorkflowError::Correlator(_)
            | WorkflowError::Validation(_)
            | WorkflowError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => WorkflowError::NotFound(id),
            StoreError::VersionConflict { id, .. } => WorkflowError::ConcurrentUpdate(id),
            other => WorkflowError::Store(other),
        }
    }
}

impl From<CorrelatorError> for WorkflowError {
    fn from(err: CorrelatorError) -> Self {
        match err {
            CorrelatorError::InvalidToken(token) => WorkflowError::InvalidToken(token),
            other => WorkflowError::Correlator(other),
        }
    }
}

impl From<ValidationError> for WorkflowError {
    fn from(err: ValidationError) -> Self {
        WorkflowError::Validation(err)
    }
}

/// Human review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approve => "APPROVE",
            ReviewDecision::Reject => "REJECT",
        }
    }

    /// State recording the decision before it is applied.
    pub fn review_state(&self) -> ApplicationState {
        match self {
            ReviewDecision::Approve => ApplicationState::ReviewApproved,
            ReviewDecision::Reject => ApplicationState::ReviewRejected,
        }
    }

    /// Terminal state the decision leads to.
    pub fn final_state(&self) -> ApplicationState {
        match self {
            ReviewDecision::Approve => ApplicationState::Approved,
            ReviewDecision::Reject => ApplicationState::Rejected,
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewDecision {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPROVE" => Ok(ReviewDecision::Approve),
            "REJECT" => Ok(ReviewDecision::Reject),
            other => Err(WorkflowError::InvalidDecision(format!(
                "Required `decision` parameter must be 'APPROVE' or 'REJECT', got '{}'",
                other
            ))),
        }
    }
}

/// Kind of flag applied to an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagType {
    Review,
    UnprocessableData,
}

impl FlagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagType::Review => "REVIEW",
            FlagType::UnprocessableData => "UNPROCESSABLE_DATA",
        }
    }
}

impl FromStr for FlagType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REVIEW" => Ok(FlagType::Review),
            "UNPROCESSABLE_DATA" => Ok(FlagType::UnprocessableData),
            other => Err(WorkflowError::InvalidFlagType(format!(
                "flagType must be REVIEW or UNPROCESSABLE_DATA, got '{}'",
                other
            ))),
        }
    }
}

/// Flag applied by the `flag` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flag {
    /// Suspend for a human decision correlated by `resume_token`
    Review { reason: String, resume_token: String },
    /// A check could not evaluate the input
    UnprocessableData { error_detail: String },
}

impl Flag {
    /// Build a flag from its wire representation.
    ///
    /// ## Errors
    /// - [`WorkflowError::InvalidFlagType`] for an unknown flag type
    /// - [`WorkflowError::InvalidToken`] for a review flag without a token
    pub fn from_parts(
        flag_type: &str,
        reason: Option<String>,
        resume_token: Option<String>,
    ) -> WorkflowResult<Self> {
        match flag_type.parse::<FlagType>()? {
            FlagType::Review => {
                let resume_token = resume_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| WorkflowError::InvalidToken("review flag requires a resume token".to_string()))?;
                Ok(Flag::Review {
                    reason: reason.unwrap_or_default(),
                    resume_token,
                })
            }
            FlagType::UnprocessableData => Ok(Flag::UnprocessableData {
                error_detail: reason.unwrap_or_default(),
            }),
        }
    }

    pub fn flag_type(&self) -> FlagType {
        match self {
            Flag::Review { .. } => FlagType::Review,
            Flag::UnprocessableData { .. } => FlagType::UnprocessableData,
        }
    }

    /// State the flag moves an application into.
    pub fn target_state(&self) -> ApplicationState {
        match self {
            Flag::Review { .. } => ApplicationState::PendingReview,
            Flag::UnprocessableData { .. } => ApplicationState::FlaggedUnprocessable,
        }
    }
}

/// Summary of a recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Applications driven to their next rest point
    pub recovered: usize,
    /// Applications that failed again and remain in flight
    pub failed: usize,
}
