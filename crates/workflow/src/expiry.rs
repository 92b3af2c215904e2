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

//! Background expiry of overdue review suspensions.
//!
//! A race between an arriving decision and the monitor is settled by the
//! correlator: whichever consumes the token first wins, the other sees
//! `InvalidToken`.

use crate::orchestrator::Orchestrator;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically expires reviews past their deadline.
pub struct ExpiryMonitor {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiryMonitor {
    /// Spawn the monitor using the orchestrator's sweep interval.
    pub fn start(orchestrator: Orchestrator) -> Self {
        let interval = orchestrator.config().expiry_sweep_interval;
        Self::start_with_interval(orchestrator, interval)
    }

    pub fn start_with_interval(orchestrator: Orchestrator, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sweep_loop(orchestrator, interval, shutdown_rx).await;
        });
        info!(interval_ms = interval.as_millis() as u64, "Expiry monitor started");
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stop the monitor and wait for the current sweep to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiry monitor task failed");
            }
        }
    }
}

impl Drop for ExpiryMonitor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn sweep_loop(orchestrator: Orchestrator, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                debug!("Expiry monitor stopping");
                return;
            }
        }
        if *shutdown_rx.borrow() {
            return;
        }

        match orchestrator.expire_overdue(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "Expired overdue reviews"),
            Err(e) => warn!(error = %e, "Expiry sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowConfig;
    use crate::correlator::InMemoryResumeCorrelator;
    use accountflow_checks::BuiltinEvaluator;
    use accountflow_common::{ApplicationState, NewApplication};
    use accountflow_store::InMemoryApplicationStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_monitor_expires_overdue_review() {
        let config = WorkflowConfig::default().with_review_timeout(Duration::from_millis(20));
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryApplicationStore::new()),
            Arc::new(InMemoryResumeCorrelator::new()),
            Arc::new(BuiltinEvaluator),
            config,
        );

        let app = orchestrator
            .submit(NewApplication::new("evil Bob", "no street number"))
            .await
            .unwrap();
        assert_eq!(app.state, ApplicationState::PendingReview);

        let monitor = ExpiryMonitor::start_with_interval(orchestrator.clone(), Duration::from_millis(10));
        let mut state = app.state;
        for _ in 0..100 {
            state = orchestrator.get(&app.id).await.unwrap().state;
            if state == ApplicationState::ReviewExpired {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        monitor.shutdown().await;

        assert_eq!(state, ApplicationState::ReviewExpired);
        assert!(orchestrator.get(&app.id).await.unwrap().resume_token.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_promptly() {
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryApplicationStore::new()),
            Arc::new(InMemoryResumeCorrelator::new()),
            Arc::new(BuiltinEvaluator),
            WorkflowConfig::default(),
        );
        let monitor = ExpiryMonitor::start_with_interval(orchestrator, Duration::from_secs(3600));
        let stopped = tokio::time::timeout(Duration::from_secs(1), monitor.shutdown()).await;
        assert!(stopped.is_ok());
    }
}
