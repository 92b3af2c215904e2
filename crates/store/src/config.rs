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

//! Configuration support for application store backends.
//!
//! ## Environment Variables
//!
//! ### Backend Selection
//! - `ACCOUNTFLOW_STORE_BACKEND`: Backend type (default: "memory")
//!   - "in-memory" | "memory" → InMemoryApplicationStore
//!   - "sqlite" → SqlApplicationStore (SQLite)
//!   - "postgres" | "postgresql" → SqlApplicationStore (PostgreSQL)
//!   - "dynamodb" | "ddb" → DynamoDBApplicationStore (requires `ddb-backend`)
//!
//! ### SQLite Configuration
//! - `ACCOUNTFLOW_STORE_SQLITE_PATH`: Database file path (default: ":memory:")
//!
//! ### PostgreSQL Configuration
//! - `ACCOUNTFLOW_STORE_POSTGRES_URL`: Connection string (required)
//! - `ACCOUNTFLOW_STORE_POSTGRES_POOL_SIZE`: Connection pool size (default: 10)
//!
//! ### DynamoDB Configuration
//! See [`DynamoDBConfig::from_env`].
//!
//! ## Examples
//! ```bash
//! export ACCOUNTFLOW_STORE_BACKEND=sqlite
//! export ACCOUNTFLOW_STORE_SQLITE_PATH=/tmp/accountflow.db
//! ```

use crate::{ApplicationStore, InMemoryApplicationStore, SqlApplicationStore, StoreError, StoreResult};
use accountflow_common::{env_opt, env_or, DynamoDBConfig};
use std::sync::Arc;
use tracing::info;

/// Backend type configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendType {
    /// In-memory BTreeMap backend (default, always available)
    #[default]
    InMemory,
    /// SQLite backend
    Sqlite {
        /// Path to SQLite database file
        path: String,
    },
    /// PostgreSQL backend
    PostgreSQL {
        /// PostgreSQL connection string
        connection_string: String,
        /// Connection pool size
        pool_size: u32,
    },
    /// DynamoDB backend (requires ddb-backend feature)
    DynamoDB(DynamoDBConfig),
}

/// Application store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreConfig {
    pub backend: BackendType,
}

impl StoreConfig {
    pub fn new(backend: BackendType) -> Self {
        Self { backend }
    }

    /// Create configuration from environment variables.
    ///
    /// ## Errors
    /// [`StoreError::Config`] for an unknown backend or a missing PostgreSQL URL
    pub fn from_env() -> StoreResult<Self> {
        let backend_str = env_opt("ACCOUNTFLOW_STORE_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase();

        let backend = match backend_str.as_str() {
            "in-memory" | "memory" => BackendType::InMemory,

            "sqlite" => BackendType::Sqlite {
                path: env_opt("ACCOUNTFLOW_STORE_SQLITE_PATH")
                    .unwrap_or_else(|| ":memory:".to_string()),
            },

            "postgres" | "postgresql" => {
                let connection_string = env_opt("ACCOUNTFLOW_STORE_POSTGRES_URL").ok_or_else(|| {
                    StoreError::Config("ACCOUNTFLOW_STORE_POSTGRES_URL not set".to_string())
                })?;
                BackendType::PostgreSQL {
                    connection_string,
                    pool_size: env_or("ACCOUNTFLOW_STORE_POSTGRES_POOL_SIZE", 10),
                }
            }

            "dynamodb" | "ddb" => BackendType::DynamoDB(DynamoDBConfig::from_env()),

            other => {
                return Err(StoreError::Config(format!(
                    "Unknown backend type: {}. Valid options: memory, sqlite, postgres, dynamodb",
                    other
                )));
            }
        };

        Ok(Self { backend })
    }
}

/// Create an application store from explicit configuration.
pub async fn create_store_from_config(config: &StoreConfig) -> StoreResult<Arc<dyn ApplicationStore>> {
    let store: Arc<dyn ApplicationStore> = match &config.backend {
        BackendType::InMemory => Arc::new(InMemoryApplicationStore::new()),
        BackendType::Sqlite { path } => Arc::new(SqlApplicationStore::new_sqlite(path).await?),
        BackendType::PostgreSQL {
            connection_string,
            pool_size,
        } => Arc::new(SqlApplicationStore::new_postgres(connection_string, *pool_size).await?),
        #[cfg(feature = "ddb-backend")]
        BackendType::DynamoDB(ddb) => Arc::new(crate::DynamoDBApplicationStore::new(ddb).await?),
        #[cfg(not(feature = "ddb-backend"))]
        BackendType::DynamoDB(_) => {
            return Err(StoreError::Config(
                "DynamoDB backend requires the ddb-backend feature".to_string(),
            ))
        }
    };
    info!(backend = store.backend_name(), "Application store created");
    Ok(store)
}

/// Create an application store from environment configuration.
pub async fn create_store_from_env() -> StoreResult<Arc<dyn ApplicationStore>> {
    create_store_from_config(&StoreConfig::from_env()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env() {
        for key in [
            "ACCOUNTFLOW_STORE_BACKEND",
            "ACCOUNTFLOW_STORE_SQLITE_PATH",
            "ACCOUNTFLOW_STORE_POSTGRES_URL",
            "ACCOUNTFLOW_STORE_POSTGRES_POOL_SIZE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_default_is_memory() {
        clear_env();
        assert_eq!(StoreConfig::from_env().unwrap().backend, BackendType::InMemory);
    }

    #[test]
    #[serial]
    fn test_sqlite_from_env() {
        clear_env();
        env::set_var("ACCOUNTFLOW_STORE_BACKEND", "SQLite");
        env::set_var("ACCOUNTFLOW_STORE_SQLITE_PATH", "/tmp/apps.db");
        assert_eq!(
            StoreConfig::from_env().unwrap().backend,
            BackendType::Sqlite {
                path: "/tmp/apps.db".to_string()
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_postgres_requires_url() {
        clear_env();
        env::set_var("ACCOUNTFLOW_STORE_BACKEND", "postgres");
        assert!(matches!(StoreConfig::from_env(), Err(StoreError::Config(_))));

        env::set_var("ACCOUNTFLOW_STORE_POSTGRES_URL", "postgres://localhost/apps");
        env::set_var("ACCOUNTFLOW_STORE_POSTGRES_POOL_SIZE", "4");
        assert_eq!(
            StoreConfig::from_env().unwrap().backend,
            BackendType::PostgreSQL {
                connection_string: "postgres://localhost/apps".to_string(),
                pool_size: 4
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unknown_backend_is_rejected() {
        clear_env();
        env::set_var("ACCOUNTFLOW_STORE_BACKEND", "redis");
        assert!(matches!(StoreConfig::from_env(), Err(StoreError::Config(_))));
        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn test_create_sqlite_store_from_config() {
        let config = StoreConfig::new(BackendType::Sqlite {
            path: ":memory:".to_string(),
        });
        let store = create_store_from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
    }
}
