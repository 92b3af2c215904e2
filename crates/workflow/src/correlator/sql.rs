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

//! SQL-based resume correlator (SQLite and PostgreSQL).
//!
//! ## Schema
//! ```sql
//! CREATE TABLE IF NOT EXISTS resume_correlations (
//!   resume_token TEXT PRIMARY KEY,
//!   application_id TEXT NOT NULL,
//!   awaiting_since BIGINT NOT NULL,
//!   deadline BIGINT NOT NULL
//! );
//! CREATE INDEX IF NOT EXISTS idx_resume_correlations_deadline ON resume_correlations (deadline);
//! ```
//!
//! One-shot consumption is a single `DELETE ... RETURNING`; the row can be
//! returned to exactly one caller.

use super::{CorrelatorError, CorrelatorResult, ResumeCorrelator, SuspendedExecution};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS resume_correlations (
        resume_token TEXT PRIMARY KEY,
        application_id TEXT NOT NULL,
        awaiting_since BIGINT NOT NULL,
        deadline BIGINT NOT NULL
    )
"#;

const CREATE_DEADLINE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_resume_correlations_deadline ON resume_correlations (deadline)";

const COLUMNS: &str = "resume_token, application_id, awaiting_since, deadline";

#[derive(Clone)]
enum SqlPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

#[derive(Debug, sqlx::FromRow)]
struct CorrelationRow {
    resume_token: String,
    application_id: String,
    awaiting_since: i64,
    deadline: i64,
}

impl TryFrom<CorrelationRow> for SuspendedExecution {
    type Error = CorrelatorError;

    fn try_from(row: CorrelationRow) -> Result<Self, Self::Error> {
        Ok(SuspendedExecution {
            awaiting_since: from_epoch_millis(row.awaiting_since)?,
            deadline: from_epoch_millis(row.deadline)?,
            resume_token: row.resume_token,
            application_id: row.application_id,
        })
    }
}

fn from_epoch_millis(millis: i64) -> CorrelatorResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CorrelatorError::Serialization(format!("timestamp out of range: {}", millis)))
}

/// SQLite/PostgreSQL correlation table.
///
/// Shares the database with the application store when both are pointed
/// at the same path or URL.
#[derive(Clone)]
pub struct SqlResumeCorrelator {
    pool: SqlPool,
}

impl SqlResumeCorrelator {
    /// Create in-memory SQLite storage for testing.
    pub async fn new_in_memory() -> CorrelatorResult<Self> {
        Self::new_sqlite(":memory:").await
    }

    /// Create a SQLite-backed correlator.
    ///
    /// ## Arguments
    /// * `path` - Database file path, `sqlite://` URL, or `:memory:`
    #[instrument(skip(path), fields(path = %path))]
    pub async fn new_sqlite(path: &str) -> CorrelatorResult<Self> {
        let in_memory = matches!(path, ":memory:" | "sqlite::memory:" | "sqlite://:memory:");

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            let file = path
                .strip_prefix("sqlite://")
                .or_else(|| path.strip_prefix("sqlite:"))
                .unwrap_or(path);
            SqliteConnectOptions::new()
                .filename(file)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
        };

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            CorrelatorError::Unavailable(format!("Failed to connect to SQLite ({}): {}", path, e))
        })?;

        let correlator = Self {
            pool: SqlPool::Sqlite(pool),
        };
        correlator.ensure_schema().await?;
        Ok(correlator)
    }

    /// Create a PostgreSQL-backed correlator.
    pub async fn new_postgres(url: &str, max_connections: u32) -> CorrelatorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| CorrelatorError::Unavailable(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let correlator = Self {
            pool: SqlPool::Postgres(pool),
        };
        correlator.ensure_schema().await?;
        Ok(correlator)
    }

    async fn ensure_schema(&self) -> CorrelatorResult<()> {
        match &self.pool {
            SqlPool::Sqlite(pool) => {
                sqlx::query(CREATE_TABLE).execute(pool).await?;
                sqlx::query(CREATE_DEADLINE_INDEX).execute(pool).await?;
            }
            SqlPool::Postgres(pool) => {
                sqlx::query(CREATE_TABLE).execute(pool).await?;
                sqlx::query(CREATE_DEADLINE_INDEX).execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn insert_row(&self, entry: &SuspendedExecution) -> CorrelatorResult<()> {
        let result = match &self.pool {
            SqlPool::Sqlite(pool) => {
                sqlx::query(&format!(
                    "INSERT INTO resume_correlations ({}) VALUES (?, ?, ?, ?)",
                    COLUMNS
                ))
                .bind(&entry.resume_token)
                .bind(&entry.application_id)
                .bind(entry.awaiting_since.timestamp_millis())
                .bind(entry.deadline.timestamp_millis())
                .execute(pool)
                .await
                .map(|_| ())
            }
            SqlPool::Postgres(pool) => {
                sqlx::query(&format!(
                    "INSERT INTO resume_correlations ({}) VALUES ($1, $2, $3, $4)",
                    COLUMNS
                ))
                .bind(&entry.resume_token)
                .bind(&entry.application_id)
                .bind(entry.awaiting_since.timestamp_millis())
                .bind(entry.deadline.timestamp_millis())
                .execute(pool)
                .await
                .map(|_| ())
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CorrelatorError::DuplicateToken(entry.resume_token.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_returning(&self, token: &str) -> CorrelatorResult<Option<SuspendedExecution>> {
        let row = match &self.pool {
            SqlPool::Sqlite(pool) => {
                sqlx::query_as::<_, CorrelationRow>(&format!(
                    "DELETE FROM resume_correlations WHERE resume_token = ? RETURNING {}",
                    COLUMNS
                ))
                .bind(token)
                .fetch_optional(pool)
                .await?
            }
            SqlPool::Postgres(pool) => {
                sqlx::query_as::<_, CorrelationRow>(&format!(
                    "DELETE FROM resume_correlations WHERE resume_token = $1 RETURNING {}",
                    COLUMNS
                ))
                .bind(token)
                .fetch_optional(pool)
                .await?
            }
        };
        row.map(SuspendedExecution::try_from).transpose()
    }
}

#[async_trait]
impl ResumeCorrelator for SqlResumeCorrelator {
    #[instrument(skip(self), fields(backend = self.backend_name()))]
    async fn suspend(
        &self,
        application_id: &str,
        timeout: Duration,
    ) -> CorrelatorResult<SuspendedExecution> {
        let entry = SuspendedExecution::new(application_id, Utc::now(), timeout);
        self.insert_row(&entry).await?;
        debug!(application_id = %application_id, deadline = %entry.deadline, "Execution suspended");
        Ok(entry)
    }

    async fn consume(&self, token: &str) -> CorrelatorResult<SuspendedExecution> {
        self.delete_returning(token)
            .await?
            .ok_or_else(|| CorrelatorError::InvalidToken(token.to_string()))
    }

    async fn cancel(&self, token: &str) -> CorrelatorResult<()> {
        self.delete_returning(token).await?;
        Ok(())
    }

    async fn reinstate(&self, entry: SuspendedExecution) -> CorrelatorResult<()> {
        self.insert_row(&entry).await
    }

    async fn peek(&self, token: &str) -> CorrelatorResult<Option<SuspendedExecution>> {
        let row = match &self.pool {
            SqlPool::Sqlite(pool) => {
                sqlx::query_as::<_, CorrelationRow>(&format!(
                    "SELECT {} FROM resume_correlations WHERE resume_token = ?",
                    COLUMNS
                ))
                .bind(token)
                .fetch_optional(pool)
                .await?
            }
            SqlPool::Postgres(pool) => {
                sqlx::query_as::<_, CorrelationRow>(&format!(
                    "SELECT {} FROM resume_correlations WHERE resume_token = $1",
                    COLUMNS
                ))
                .bind(token)
                .fetch_optional(pool)
                .await?
            }
        };
        row.map(SuspendedExecution::try_from).transpose()
    }

    async fn expired(&self, now: DateTime<Utc>, limit: usize) -> CorrelatorResult<Vec<SuspendedExecution>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match &self.pool {
            SqlPool::Sqlite(pool) => {
                sqlx::query_as::<_, CorrelationRow>(&format!(
                    "SELECT {} FROM resume_correlations WHERE deadline <= ? ORDER BY deadline LIMIT ?",
                    COLUMNS
                ))
                .bind(now.timestamp_millis())
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            SqlPool::Postgres(pool) => {
                sqlx::query_as::<_, CorrelationRow>(&format!(
                    "SELECT {} FROM resume_correlations WHERE deadline <= $1 ORDER BY deadline LIMIT $2",
                    COLUMNS
                ))
                .bind(now.timestamp_millis())
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };
        rows.into_iter().map(SuspendedExecution::try_from).collect()
    }

    fn backend_name(&self) -> &'static str {
        match &self.pool {
            SqlPool::Sqlite(_) => "sqlite",
            SqlPool::Postgres(_) => "postgres",
        }
    }
}
