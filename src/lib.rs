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

//! AccountFlow: durable review workflow for submitted applications.
//!
//! An application is validated by parallel automated checks, suspended for a
//! human decision when any check flags it, and resolved to a terminal state.
//! Suspension survives process boundaries: the decision may arrive minutes
//! or days later through a completely separate invocation.
//!
//! Member crates:
//! 1. [`common`]: application model, lifecycle graph, retry policy, tracing
//! 2. [`store`]: versioned application store (memory, SQL, DynamoDB)
//! 3. [`checks`]: parallel validation runner
//! 4. [`workflow`]: orchestrator, resume correlator, expiry monitor

#![warn(rustdoc::missing_crate_level_docs)]

pub use accountflow_checks as checks;
pub use accountflow_common as common;
pub use accountflow_store as store;
pub use accountflow_workflow as workflow;

// Top-level runtime wiring store, correlator and orchestrator from config
pub mod runtime;

pub use checks::{BuiltinEvaluator, CheckEvaluator, CheckKind, CheckOutcome, ValidationError};
pub use common::{Application, ApplicationState, NewApplication, RetryPolicy};
pub use runtime::{AccountFlow, RuntimeError};
pub use store::{ApplicationStore, Page, PaginationKey, StoreConfig, StoreError};
pub use workflow::{
    ErrorKind, ExpiryMonitor, Flag, FlagType, Orchestrator, ResumeCorrelator, ReviewDecision,
    WorkflowConfig, WorkflowError,
};
