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

//! Application entity and its review lifecycle.
//!
//! ## Lifecycle
//! ```text
//! SUBMITTED ──► VALIDATING ──┬──► APPROVED
//!                            ├──► FLAGGED_UNPROCESSABLE
//!                            └──► PENDING_REVIEW ──┬──► REVIEW_APPROVED ──► APPROVED
//!                                                  ├──► REVIEW_REJECTED ──► REJECTED
//!                                                  └──► REVIEW_EXPIRED
//! ```
//!
//! The graph is closed: [`ApplicationState::can_transition_to`] is the single
//! source of truth used by every store backend and by the orchestrator.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use ulid::Ulid;

/// Prefix of every application id.
pub const APPLICATION_ID_PREFIX: &str = "application_";

/// Generate a fresh application id (`application_<ULID>`).
///
/// ULIDs are lexicographically sortable by creation time, so index order
/// on `id` roughly follows submission order.
pub fn new_application_id() -> String {
    format!("{}{}", APPLICATION_ID_PREFIX, Ulid::new())
}

/// Returned when a persisted or user-provided state name is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown application state: {0}")]
pub struct UnknownStateError(pub String);

/// State of an application in the review pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    /// Record created, workflow not yet started
    Submitted,
    /// Automated checks are running
    Validating,
    /// A check could not evaluate the input (terminal, manual remediation)
    FlaggedUnprocessable,
    /// Suspended until a reviewer decides
    PendingReview,
    /// Reviewer approved; final approval pending
    ReviewApproved,
    /// Reviewer rejected; final rejection pending
    ReviewRejected,
    /// Terminal
    Approved,
    /// Terminal
    Rejected,
    /// No decision arrived before the review deadline (terminal)
    ReviewExpired,
}

impl ApplicationState {
    /// Every state, in lifecycle order.
    pub const ALL: [ApplicationState; 9] = [
        Self::Submitted,
        Self::Validating,
        Self::FlaggedUnprocessable,
        Self::PendingReview,
        Self::ReviewApproved,
        Self::ReviewRejected,
        Self::Approved,
        Self::Rejected,
        Self::ReviewExpired,
    ];

    /// Canonical wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Validating => "VALIDATING",
            Self::FlaggedUnprocessable => "FLAGGED_UNPROCESSABLE",
            Self::PendingReview => "PENDING_REVIEW",
            Self::ReviewApproved => "REVIEW_APPROVED",
            Self::ReviewRejected => "REVIEW_REJECTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::ReviewExpired => "REVIEW_EXPIRED",
        }
    }

    /// Parse a state name (for SQL/DynamoDB storage and query parameters).
    ///
    /// Matching is case-insensitive. The legacy names `FLAGGED_FOR_REVIEW`
    /// and `FLAGGED_WITH_UNPROCESSABLE_DATA` are accepted as aliases.
    pub fn from_string(s: &str) -> Result<Self, UnknownStateError> {
        match s.trim().to_uppercase().as_str() {
            "SUBMITTED" => Ok(Self::Submitted),
            "VALIDATING" => Ok(Self::Validating),
            "FLAGGED_UNPROCESSABLE" | "FLAGGED_WITH_UNPROCESSABLE_DATA" => {
                Ok(Self::FlaggedUnprocessable)
            }
            "PENDING_REVIEW" | "FLAGGED_FOR_REVIEW" => Ok(Self::PendingReview),
            "REVIEW_APPROVED" => Ok(Self::ReviewApproved),
            "REVIEW_REJECTED" => Ok(Self::ReviewRejected),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "REVIEW_EXPIRED" => Ok(Self::ReviewExpired),
            _ => Err(UnknownStateError(s.to_string())),
        }
    }

    /// States directly reachable from `self`.
    pub fn successors(&self) -> &'static [ApplicationState] {
        match self {
            Self::Submitted => &[Self::Validating],
            Self::Validating => &[
                Self::FlaggedUnprocessable,
                Self::PendingReview,
                Self::Approved,
            ],
            Self::PendingReview => &[
                Self::ReviewApproved,
                Self::ReviewRejected,
                Self::ReviewExpired,
            ],
            Self::ReviewApproved => &[Self::Approved],
            Self::ReviewRejected => &[Self::Rejected],
            Self::FlaggedUnprocessable
            | Self::Approved
            | Self::Rejected
            | Self::ReviewExpired => &[],
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: ApplicationState) -> bool {
        self.successors().contains(&next)
    }

    /// No further automatic transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

/// Caller-supplied attributes of a new application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplication {
    pub name: String,
    pub address: String,
}

impl NewApplication {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Durable application record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// `application_<ULID>`, immutable
    pub id: String,
    pub name: String,
    pub address: String,
    pub state: ApplicationState,
    /// Why the application was flagged
    pub reason: Option<String>,
    /// Present only while awaiting a human decision
    pub resume_token: Option<String>,
    /// Incremented on every successful update
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Timestamps are persisted with millisecond precision by every backend.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(3)
}

impl Application {
    /// Build a freshly submitted record (state `SUBMITTED`, version 0).
    pub fn submitted(id: String, attrs: NewApplication, now: DateTime<Utc>) -> Self {
        let now = truncate_to_millis(now);
        Self {
            id,
            name: attrs.name,
            address: attrs.address,
            state: ApplicationState::Submitted,
            reason: None,
            resume_token: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_awaiting_review(&self) -> bool {
        self.state == ApplicationState::PendingReview && self.resume_token.is_some()
    }

    /// Drop sub-millisecond precision so the record equals its stored form.
    pub fn truncated_to_millis(mut self) -> Self {
        self.created_at = truncate_to_millis(self.created_at);
        self.updated_at = truncate_to_millis(self.updated_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_string() {
        for state in ApplicationState::ALL {
            assert_eq!(ApplicationState::from_string(state.as_str()).unwrap(), state);
            assert_eq!(state.to_string(), state.as_str());
        }
    }

    #[test]
    fn test_legacy_state_aliases() {
        assert_eq!(
            ApplicationState::from_string("FLAGGED_FOR_REVIEW").unwrap(),
            ApplicationState::PendingReview
        );
        assert_eq!(
            "flagged_with_unprocessable_data".parse::<ApplicationState>().unwrap(),
            ApplicationState::FlaggedUnprocessable
        );
        assert!(ApplicationState::from_string("PAUSED").is_err());
    }

    #[test]
    fn test_serde_uses_screaming_names() {
        let json = serde_json::to_string(&ApplicationState::PendingReview).unwrap();
        assert_eq!(json, "\"PENDING_REVIEW\"");
    }

    #[test]
    fn test_transition_graph() {
        use ApplicationState::*;

        assert!(Submitted.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Approved));
        assert!(Validating.can_transition_to(PendingReview));
        assert!(Validating.can_transition_to(FlaggedUnprocessable));
        assert!(PendingReview.can_transition_to(ReviewRejected));
        assert!(ReviewRejected.can_transition_to(Rejected));

        // No skipping VALIDATING, no re-entering SUBMITTED
        assert!(!Submitted.can_transition_to(Approved));
        for state in ApplicationState::ALL {
            assert!(!state.can_transition_to(Submitted));
        }
        // Review outcomes cannot cross over
        assert!(!ReviewApproved.can_transition_to(Rejected));
        assert!(!PendingReview.can_transition_to(Approved));
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ApplicationState::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                ApplicationState::FlaggedUnprocessable,
                ApplicationState::Approved,
                ApplicationState::Rejected,
                ApplicationState::ReviewExpired,
            ]
        );
    }

    #[test]
    fn test_new_ids_are_prefixed_and_unique() {
        let a = new_application_id();
        let b = new_application_id();
        assert!(a.starts_with(APPLICATION_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn test_submitted_record() {
        let now = Utc::now();
        let app = Application::submitted(
            "application_1".to_string(),
            NewApplication::new("Alice", "123 Main St"),
            now,
        );
        assert_eq!(app.state, ApplicationState::Submitted);
        assert_eq!(app.version, 0);
        assert!(app.resume_token.is_none());
        assert!(!app.is_awaiting_review());
    }

    #[test]
    fn test_submitted_timestamps_have_millisecond_precision() {
        let now = DateTime::parse_from_rfc3339("2025-03-01T10:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let app = Application::submitted(
            "application_1".to_string(),
            NewApplication::new("Alice", "123 Main St"),
            now,
        );
        assert_eq!(app.created_at.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(app.updated_at, app.created_at);
        assert_eq!(
            DateTime::from_timestamp_millis(app.created_at.timestamp_millis()),
            Some(app.created_at)
        );
    }

    #[test]
    fn test_awaiting_review_needs_pending_state_and_token() {
        let mut app = Application::submitted(
            "application_1".to_string(),
            NewApplication::new("evil Bob", "no street number"),
            Utc::now(),
        );
        app.state = ApplicationState::PendingReview;
        assert!(!app.is_awaiting_review());
        app.resume_token = Some("resume_1".to_string());
        assert!(app.is_awaiting_review());
    }
}
