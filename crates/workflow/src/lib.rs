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

//! # AccountFlow Workflow Orchestration
//!
//! ## Purpose
//! Drives submitted applications through the review pipeline: parallel
//! validation, conditional human review and final resolution.
//!
//! ## Architecture Context
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Orchestrator                          │
//! │  submit / process / flag / resume / expire / approve     │
//! └──────┬──────────────────┬─────────────────────┬──────────┘
//!        │                  │                     │
//!        ▼                  ▼                     ▼
//! ┌──────────────┐  ┌────────────────┐  ┌──────────────────┐
//! │ Validation   │  │ Application    │  │ Resume           │
//! │ Runner       │  │ Store          │  │ Correlator       │
//! │ (parallel)   │  │ (versioned)    │  │ (one-shot tokens)│
//! └──────────────┘  └────────────────┘  └──────────────────┘
//!                                               ▲
//!                                   ┌───────────┴──────────┐
//!                                   │   ExpiryMonitor      │
//!                                   └──────────────────────┘
//! ```
//!
//! ## Key Components
//! - [`Orchestrator`]: the state machine
//! - [`ResumeCorrelator`]: token table for suspended reviews (memory, SQL)
//! - [`ExpiryMonitor`]: background task expiring overdue reviews
//! - [`WorkflowConfig`]: timeouts, retry policies, page sizes
//!
//! ## Examples
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(store, correlator, Arc::new(BuiltinEvaluator), WorkflowConfig::default());
//! let app = orchestrator.submit(NewApplication::new("evil Bob", "no street number")).await?;
//! assert_eq!(app.state, ApplicationState::PendingReview);
//!
//! // Later, from a different process
//! let app = orchestrator.submit_review_decision(&app.id, "REJECT").await?;
//! assert_eq!(app.state, ApplicationState::Rejected);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod correlator;
pub mod expiry;
pub mod orchestrator;
pub mod types;

pub use config::{create_correlator, CorrelatorBackend, WorkflowConfig, DEFAULT_REVIEW_TIMEOUT};
pub use correlator::{
    CorrelatorError, CorrelatorResult, InMemoryResumeCorrelator, ResumeCorrelator,
    SqlResumeCorrelator, SuspendedExecution,
};
pub use expiry::ExpiryMonitor;
pub use orchestrator::Orchestrator;
pub use types::*;
