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

//! AccountFlow runtime.
//!
//! ## Purpose
//! Builds the store, correlator and orchestrator from configuration and
//! owns the expiry monitor. Request adapters (HTTP, CLI, queue consumers)
//! hold an [`AccountFlow`] and call its orchestrator.
//!
//! ## Examples
//! ```rust,ignore
//! let flow = AccountFlow::from_env().await?;
//! flow.start_expiry_monitor().await;
//! let app = flow.orchestrator().submit(NewApplication::new("Alice", "123 Main St")).await?;
//! flow.shutdown().await;
//! ```

use accountflow_checks::{BuiltinEvaluator, CheckEvaluator};
use accountflow_store::{create_store_from_config, StoreConfig, StoreError};
use accountflow_workflow::{
    create_correlator, CorrelatorBackend, CorrelatorError, ExpiryMonitor, Orchestrator,
    WorkflowConfig,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Runtime startup errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Store initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error("Correlator initialization failed: {0}")]
    Correlator(#[from] CorrelatorError),
}

/// A configured AccountFlow instance.
pub struct AccountFlow {
    orchestrator: Orchestrator,
    monitor: Mutex<Option<ExpiryMonitor>>,
}

impl AccountFlow {
    /// Build from environment variables with the built-in check rules.
    ///
    /// See [`StoreConfig::from_env`], [`CorrelatorBackend::from_env`] and
    /// [`WorkflowConfig::from_env`] for the variables read.
    pub async fn from_env() -> Result<Self, RuntimeError> {
        Self::from_config(
            &StoreConfig::from_env()?,
            &CorrelatorBackend::from_env()?,
            WorkflowConfig::from_env(),
            Arc::new(BuiltinEvaluator),
        )
        .await
    }

    pub async fn from_config(
        store: &StoreConfig,
        correlator: &CorrelatorBackend,
        config: WorkflowConfig,
        evaluator: Arc<dyn CheckEvaluator>,
    ) -> Result<Self, RuntimeError> {
        let store = create_store_from_config(store).await?;
        let correlator = create_correlator(correlator).await?;
        info!(
            store = store.backend_name(),
            correlator = correlator.backend_name(),
            review_timeout_secs = config.review_timeout.as_secs(),
            "AccountFlow runtime configured"
        );
        Ok(Self {
            orchestrator: Orchestrator::new(store, correlator, evaluator, config),
            monitor: Mutex::new(None),
        })
    }

    /// Everything in memory; for tests and demos.
    pub async fn in_memory() -> Result<Self, RuntimeError> {
        Self::from_config(
            &StoreConfig::default(),
            &CorrelatorBackend::InMemory,
            WorkflowConfig::default(),
            Arc::new(BuiltinEvaluator),
        )
        .await
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Start expiring overdue reviews in the background. No-op if running.
    pub async fn start_expiry_monitor(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_none() {
            *monitor = Some(ExpiryMonitor::start(self.orchestrator.clone()));
        }
    }

    /// Stop background tasks.
    pub async fn shutdown(&self) {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.shutdown().await;
        }
        info!("AccountFlow runtime stopped");
    }
}
