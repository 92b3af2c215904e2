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

//! In-memory resume correlator.

use super::{CorrelatorError, CorrelatorResult, ResumeCorrelator, SuspendedExecution};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Correlation table held in process memory.
///
/// Consumption removes the entry under the write lock, so two concurrent
/// `consume` calls for the same token cannot both succeed.
#[derive(Clone, Default)]
pub struct InMemoryResumeCorrelator {
    entries: Arc<RwLock<HashMap<String, SuspendedExecution>>>,
}

impl InMemoryResumeCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending correlations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResumeCorrelator for InMemoryResumeCorrelator {
    async fn suspend(
        &self,
        application_id: &str,
        timeout: Duration,
    ) -> CorrelatorResult<SuspendedExecution> {
        let entry = SuspendedExecution::new(application_id, Utc::now(), timeout);
        self.entries
            .write()
            .await
            .insert(entry.resume_token.clone(), entry.clone());
        debug!(application_id = %application_id, deadline = %entry.deadline, "Execution suspended");
        Ok(entry)
    }

    async fn consume(&self, token: &str) -> CorrelatorResult<SuspendedExecution> {
        self.entries
            .write()
            .await
            .remove(token)
            .ok_or_else(|| CorrelatorError::InvalidToken(token.to_string()))
    }

    async fn cancel(&self, token: &str) -> CorrelatorResult<()> {
        self.entries.write().await.remove(token);
        Ok(())
    }

    async fn reinstate(&self, entry: SuspendedExecution) -> CorrelatorResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.resume_token) {
            return Err(CorrelatorError::DuplicateToken(entry.resume_token));
        }
        entries.insert(entry.resume_token.clone(), entry);
        Ok(())
    }

    async fn peek(&self, token: &str) -> CorrelatorResult<Option<SuspendedExecution>> {
        Ok(self.entries.read().await.get(token).cloned())
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> CorrelatorResult<Vec<SuspendedExecution>> {
        let mut expired: Vec<SuspendedExecution> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        expired.truncate(limit);
        Ok(expired)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
