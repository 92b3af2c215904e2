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

//! Environment-driven configuration helpers.
//!
//! ## Environment Variables
//! - `AWS_REGION` / `ACCOUNTFLOW_AWS_REGION` - AWS region (default: "us-east-1")
//! - `DYNAMODB_ENDPOINT_URL` / `ACCOUNTFLOW_DDB_ENDPOINT_URL` - DynamoDB endpoint (local testing)
//! - `ACCOUNTFLOW_DDB_TABLE` - Applications table name (default: "accountflow-applications")

use std::env;
use std::str::FromStr;

/// Read and parse an environment variable, falling back to `default` when
/// it is unset, empty or unparsable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a non-empty environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// DynamoDB configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDBConfig {
    /// AWS region
    pub region: String,
    /// Applications table name
    pub table_name: String,
    /// Endpoint URL (for DynamoDB Local)
    pub endpoint_url: Option<String>,
}

impl Default for DynamoDBConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            table_name: "accountflow-applications".to_string(),
            endpoint_url: None,
        }
    }
}

impl DynamoDBConfig {
    /// Load DynamoDB configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let region = env_opt("AWS_REGION")
            .or_else(|| env_opt("ACCOUNTFLOW_AWS_REGION"))
            .unwrap_or(defaults.region);

        let table_name = env_opt("ACCOUNTFLOW_DDB_TABLE").unwrap_or(defaults.table_name);

        let endpoint_url =
            env_opt("DYNAMODB_ENDPOINT_URL").or_else(|| env_opt("ACCOUNTFLOW_DDB_ENDPOINT_URL"));

        Self {
            region,
            table_name,
            endpoint_url,
        }
    }
}
