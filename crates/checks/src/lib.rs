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

//! # AccountFlow Validation Checks
//!
//! ## Purpose
//! Runs the fixed set of automated checks against one application, all
//! concurrently, and classifies each result.
//!
//! ## Design
//! - **Enum dispatch**: [`CheckKind`] is the closed set of checks; each kind
//!   selects the attribute it evaluates
//! - **Predicate seam**: [`CheckEvaluator`] is the only place business rules live;
//!   [`BuiltinEvaluator`] ships the default rules
//! - **Classification**: `flagged` is a business outcome, [`CheckError::MalformedData`]
//!   means the input cannot be evaluated, anything else is transient and retried
//!
//! ## Examples
//! ```rust,ignore
//! let runner = ValidationRunner::new(Arc::new(BuiltinEvaluator), RetryPolicy::default());
//! match runner.run_all(&application).await {
//!     Ok(outcomes) if outcomes.iter().any(|o| o.flagged) => { /* needs review */ }
//!     Ok(_) => { /* approve */ }
//!     Err(ValidationError::MalformedData { .. }) => { /* unprocessable */ }
//!     Err(fatal) => { /* abort the step */ }
//! }
//! ```

pub mod builtin;
pub mod runner;

pub use builtin::BuiltinEvaluator;
pub use runner::ValidationRunner;

use accountflow_common::Application;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One automated check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    #[serde(rename = "CHECK_NAME")]
    Name,
    #[serde(rename = "CHECK_ADDRESS")]
    Address,
}

impl CheckKind {
    /// Every check, in the order results are reported.
    pub const ALL: [CheckKind; 2] = [CheckKind::Name, CheckKind::Address];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Name => "CHECK_NAME",
            CheckKind::Address => "CHECK_ADDRESS",
        }
    }

    /// The attribute this check evaluates.
    pub fn attribute<'a>(&self, application: &'a Application) -> &'a str {
        match self {
            CheckKind::Name => &application.name,
            CheckKind::Address => &application.address,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckKind {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECK_NAME" => Ok(CheckKind::Name),
            "CHECK_ADDRESS" => Ok(CheckKind::Address),
            other => Err(CheckError::UnknownCheck(other.to_string())),
        }
    }
}

/// Result of one successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub check: CheckKind,
    pub flagged: bool,
}

/// Failure of a single check invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// The input cannot be evaluated; never retried
    #[error("{detail}")]
    MalformedData { detail: String },

    /// Invocation failure; retried by policy
    #[error("Transient check failure: {0}")]
    Transient(String),

    #[error("Unknown check: {0}")]
    UnknownCheck(String),
}

impl CheckError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        CheckError::MalformedData {
            detail: detail.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CheckError::Transient(_))
    }
}

/// Failure of a whole validation run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Some check could not evaluate its input
    #[error("{check}: {detail}")]
    MalformedData { check: CheckKind, detail: String },

    /// A check kept failing after all retry attempts
    #[error("{check} failed after {attempts} attempts: {message}")]
    Transient {
        check: CheckKind,
        attempts: u32,
        message: String,
    },

    /// A check task panicked or was cancelled
    #[error("{check} aborted: {message}")]
    Aborted { check: CheckKind, message: String },
}

impl ValidationError {
    pub fn check(&self) -> CheckKind {
        match self {
            ValidationError::MalformedData { check, .. }
            | ValidationError::Transient { check, .. }
            | ValidationError::Aborted { check, .. } => *check,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, ValidationError::MalformedData { .. })
    }
}

/// Evaluates one check against its attribute.
///
/// ## Returns
/// `Ok(true)` when the attribute needs human review
#[async_trait]
pub trait CheckEvaluator: Send + Sync {
    async fn evaluate(&self, check: CheckKind, input: &str) -> Result<bool, CheckError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names() {
        for check in CheckKind::ALL {
            assert_eq!(check.as_str().parse::<CheckKind>().unwrap(), check);
        }
        assert!(matches!(
            "CHECK_CREDIT".parse::<CheckKind>(),
            Err(CheckError::UnknownCheck(_))
        ));
    }

    #[test]
    fn test_malformed_display_is_detail() {
        let err = ValidationError::MalformedData {
            check: CheckKind::Name,
            detail: "cannot check".to_string(),
        };
        assert_eq!(err.to_string(), "CHECK_NAME: cannot check");
        assert!(err.is_malformed());
        assert_eq!(err.check(), CheckKind::Name);
    }
}
