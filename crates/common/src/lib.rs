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

//! # AccountFlow Common
//!
//! ## Purpose
//! Types and helpers shared by every AccountFlow crate:
//! - [`Application`] and its lifecycle graph ([`ApplicationState`])
//! - [`RetryPolicy`] with bounded exponential backoff
//! - Environment configuration helpers
//! - Tracing setup

pub mod application;
pub mod aws_config;
pub mod retry;
pub mod tracing_setup;

pub use application::{
    new_application_id, truncate_to_millis, Application, ApplicationState, NewApplication,
    UnknownStateError, APPLICATION_ID_PREFIX,
};
pub use aws_config::{env_opt, env_or, DynamoDBConfig};
pub use retry::{retry_with_backoff, RetryFailure, RetryPolicy};
pub use tracing_setup::init_tracing;
