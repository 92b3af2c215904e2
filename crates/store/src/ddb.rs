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

//! DynamoDB-based application store.
//!
//! ## Table Schema
//! ```text
//! Partition Key: id (S)
//! Attributes:
//!   - name, address, state: S
//!   - reason, resume_token: S (optional)
//!   - version: N (optimistic locking)
//!   - created_at, updated_at: N (UNIX epoch millis)
//! ```
//!
//! ### GSI: state
//! - Partition Key: `state`
//! - Sort Key: `id`
//! - Purpose: page through applications by state
//!
//! ## Design
//! - **Auto-table creation** on initialization
//! - **Creates** use `attribute_not_exists(id)`
//! - **Updates** are full-item puts conditioned on `version = :expected_version`
//! - **Pagination key** is the JSON-encoded `LastEvaluatedKey`

use crate::{
    effective_limit, record_operation, ApplicationMutation, ApplicationStore, Page,
    PaginationKey, StoreError, StoreResult,
};
use accountflow_common::{Application, ApplicationState, DynamoDBConfig};
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::{ProvideErrorMetadata, SdkError},
    types::{
        AttributeDefinition, AttributeValue, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
        KeyType, Projection, ProjectionType, ScalarAttributeType, TableStatus,
    },
    Client as DynamoDbClient,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

const BACKEND: &str = "dynamodb";
const STATE_INDEX: &str = "state";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailedException";
const TRANSIENT_CODES: [&str; 5] = [
    "ProvisionedThroughputExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
];

/// Classify an SDK error as transient or fatal.
fn sdk_error<E, R>(operation: &str, err: &SdkError<E, R>) -> StoreError
where
    SdkError<E, R>: ProvideErrorMetadata + std::fmt::Display,
{
    let code = err.code().unwrap_or("unknown");
    let message = err.message().map(|m| m.to_string()).unwrap_or_else(|| err.to_string());
    let transient = matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_))
        || TRANSIENT_CODES.contains(&code);

    error!(operation = %operation, error_code = %code, error_message = %message, "DynamoDB request failed");
    let detail = format!("DynamoDB {} failed: {} (code: {})", operation, message, code);
    if transient {
        StoreError::Unavailable(detail)
    } else {
        StoreError::Backend(detail)
    }
}

fn is_conditional_failure<E, R>(err: &SdkError<E, R>) -> bool
where
    SdkError<E, R>: ProvideErrorMetadata,
{
    err.code() == Some(CONDITIONAL_CHECK_FAILED)
}

/// DynamoDB application store.
#[derive(Clone)]
pub struct DynamoDBApplicationStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDBApplicationStore {
    /// Connect and create the table if it does not exist.
    #[instrument(skip(config), fields(region = %config.region, table_name = %config.table_name))]
    pub async fn new(config: &DynamoDBConfig) -> StoreResult<Self> {
        let start_time = Instant::now();

        let mut config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            config_builder = config_builder.endpoint_url(endpoint);
        }
        let sdk_config = config_builder.load().await;
        let client = DynamoDbClient::new(&sdk_config);

        Self::ensure_table_exists(&client, &config.table_name).await?;

        metrics::histogram!(
            "accountflow_store_ddb_init_duration_seconds",
            "backend" => BACKEND
        )
        .record(start_time.elapsed().as_secs_f64());
        debug!(table_name = %config.table_name, "DynamoDB application store initialized");

        Ok(Self {
            client,
            table_name: config.table_name.clone(),
        })
    }

    #[instrument(skip(client), fields(table_name = %table_name))]
    async fn ensure_table_exists(client: &DynamoDbClient, table_name: &str) -> StoreResult<()> {
        match client.describe_table().table_name(table_name).send().await {
            Ok(_) => {
                debug!(table_name = %table_name, "DynamoDB table already exists");
                return Ok(());
            }
            Err(e) if e.code() == Some("ResourceNotFoundException") => {}
            Err(e) => return Err(sdk_error("describe_table", &e)),
        }

        debug!(table_name = %table_name, "Creating DynamoDB applications table");

        let build_err = |e: aws_sdk_dynamodb::error::BuildError| {
            StoreError::Config(format!("Failed to build table schema: {}", e))
        };

        let id_attr = AttributeDefinition::builder()
            .attribute_name("id")
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(build_err)?;
        let state_attr = AttributeDefinition::builder()
            .attribute_name("state")
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(build_err)?;
        let id_key = KeySchemaElement::builder()
            .attribute_name("id")
            .key_type(KeyType::Hash)
            .build()
            .map_err(build_err)?;
        let state_gsi = GlobalSecondaryIndex::builder()
            .index_name(STATE_INDEX)
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name("state")
                    .key_type(KeyType::Hash)
                    .build()
                    .map_err(build_err)?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name("id")
                    .key_type(KeyType::Range)
                    .build()
                    .map_err(build_err)?,
            )
            .projection(Projection::builder().projection_type(ProjectionType::All).build())
            .build()
            .map_err(build_err)?;

        let create_result = client
            .create_table()
            .table_name(table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .key_schema(id_key)
            .attribute_definitions(id_attr)
            .attribute_definitions(state_attr)
            .global_secondary_indexes(state_gsi)
            .send()
            .await;

        match create_result {
            Ok(_) => Self::wait_for_table_active(client, table_name).await,
            Err(e) if e.code() == Some("ResourceInUseException") => {
                debug!(table_name = %table_name, "Table created concurrently, waiting for active");
                Self::wait_for_table_active(client, table_name).await
            }
            Err(e) => Err(sdk_error("create_table", &e)),
        }
    }

    async fn wait_for_table_active(client: &DynamoDbClient, table_name: &str) -> StoreResult<()> {
        let max_attempts = 30;
        for _ in 0..max_attempts {
            let described = client
                .describe_table()
                .table_name(table_name)
                .send()
                .await
                .map_err(|e| sdk_error("describe_table", &e))?;

            match described.table().and_then(|t| t.table_status()) {
                Some(TableStatus::Active) => {
                    debug!(table_name = %table_name, "Table is now active");
                    return Ok(());
                }
                Some(TableStatus::Creating) | Some(TableStatus::Updating) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                other => {
                    return Err(StoreError::Backend(format!(
                        "Table in unexpected status: {:?}",
                        other
                    )))
                }
            }
        }
        Err(StoreError::Unavailable(format!(
            "Table creation timeout after {} attempts",
            max_attempts
        )))
    }

    fn application_to_item(app: &Application) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(app.id.clone()));
        item.insert("name".to_string(), AttributeValue::S(app.name.clone()));
        item.insert("address".to_string(), AttributeValue::S(app.address.clone()));
        item.insert("state".to_string(), AttributeValue::S(app.state.as_str().to_string()));
        if let Some(reason) = &app.reason {
            item.insert("reason".to_string(), AttributeValue::S(reason.clone()));
        }
        if let Some(token) = &app.resume_token {
            item.insert("resume_token".to_string(), AttributeValue::S(token.clone()));
        }
        item.insert("version".to_string(), AttributeValue::N(app.version.to_string()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::N(app.created_at.timestamp_millis().to_string()),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::N(app.updated_at.timestamp_millis().to_string()),
        );
        item
    }

    fn item_to_application(item: &HashMap<String, AttributeValue>) -> StoreResult<Application> {
        let string = |key: &str| -> StoreResult<String> {
            item.get(key)
                .and_then(|v| v.as_s().ok())
                .cloned()
                .ok_or_else(|| StoreError::Serialization(format!("Missing {}", key)))
        };
        let optional = |key: &str| item.get(key).and_then(|v| v.as_s().ok()).cloned();
        let number = |key: &str| -> StoreResult<i64> {
            item.get(key)
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse::<i64>().ok())
                .ok_or_else(|| StoreError::Serialization(format!("Missing or invalid {}", key)))
        };
        let timestamp = |key: &str| -> StoreResult<DateTime<Utc>> {
            let millis = number(key)?;
            DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| StoreError::Serialization(format!("Invalid {}: {}", key, millis)))
        };

        Ok(Application {
            id: string("id")?,
            name: string("name")?,
            address: string("address")?,
            state: ApplicationState::from_string(&string("state")?)?,
            reason: optional("reason"),
            resume_token: optional("resume_token"),
            version: u64::try_from(number("version")?)
                .map_err(|_| StoreError::Serialization("Negative version".to_string()))?,
            created_at: timestamp("created_at")?,
            updated_at: timestamp("updated_at")?,
        })
    }

    fn encode_pagination_key(key: &HashMap<String, AttributeValue>) -> StoreResult<PaginationKey> {
        let plain: BTreeMap<&str, &str> = key
            .iter()
            .filter_map(|(k, v)| v.as_s().ok().map(|s| (k.as_str(), s.as_str())))
            .collect();
        Ok(PaginationKey::new(serde_json::to_string(&plain)?))
    }

    fn decode_pagination_key(key: &PaginationKey) -> StoreResult<HashMap<String, AttributeValue>> {
        let plain: HashMap<String, String> = serde_json::from_str(key.as_str())
            .map_err(|_| StoreError::InvalidPaginationKey(key.to_string()))?;
        if !plain.contains_key("id") {
            return Err(StoreError::InvalidPaginationKey(key.to_string()));
        }
        Ok(plain
            .into_iter()
            .map(|(k, v)| (k, AttributeValue::S(v)))
            .collect())
    }

    async fn fetch(&self, id: &str) -> StoreResult<Option<Application>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| sdk_error("get_item", &e))?;
        result.item().map(Self::item_to_application).transpose()
    }

    async fn put_new(&self, application: &Application) -> StoreResult<()> {
        match self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::application_to_item(application)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_conditional_failure(&e) => Err(StoreError::DuplicateKey(application.id.clone())),
            Err(e) => Err(sdk_error("put_item", &e)),
        }
    }

    async fn put_guarded(
        &self,
        id: &str,
        expected_version: u64,
        mutation: &ApplicationMutation,
    ) -> StoreResult<Application> {
        let current = self
            .fetch(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        let next = mutation.apply(&current, Utc::now())?;

        match self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::application_to_item(&next)))
            .condition_expression("version = :expected_version")
            .expression_attribute_values(
                ":expected_version",
                AttributeValue::N(expected_version.to_string()),
            )
            .send()
            .await
        {
            Ok(_) => Ok(next),
            Err(e) if is_conditional_failure(&e) => {
                warn!(application_id = %id, expected_version, "Concurrent update detected");
                match self.fetch(id).await? {
                    Some(latest) => Err(StoreError::VersionConflict {
                        id: id.to_string(),
                        expected: expected_version,
                        actual: latest.version,
                    }),
                    None => Err(StoreError::NotFound(id.to_string())),
                }
            }
            Err(e) => Err(sdk_error("put_item", &e)),
        }
    }

    async fn delete_item(&self, id: &str) -> StoreResult<()> {
        match self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("id", AttributeValue::S(id.to_string()))
            .condition_expression("attribute_exists(id)")
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_conditional_failure(&e) => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(sdk_error("delete_item", &e)),
        }
    }

    async fn query_state(
        &self,
        state: ApplicationState,
        pagination_key: Option<&PaginationKey>,
        limit: usize,
    ) -> StoreResult<Page> {
        let exclusive_start_key = pagination_key.map(Self::decode_pagination_key).transpose()?;
        let result = self
            .client
            .query()
            .table_name(&self.table_name)
            .index_name(STATE_INDEX)
            .key_condition_expression("#state = :state")
            .expression_attribute_names("#state", "state")
            .expression_attribute_values(":state", AttributeValue::S(state.as_str().to_string()))
            .set_exclusive_start_key(exclusive_start_key)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|e| sdk_error("query", &e))?;

        let items = result
            .items()
            .iter()
            .map(Self::item_to_application)
            .collect::<StoreResult<Vec<_>>>()?;
        let next_pagination_key = result
            .last_evaluated_key()
            .map(Self::encode_pagination_key)
            .transpose()?;

        Ok(Page {
            items,
            next_pagination_key,
        })
    }
}

#[async_trait]
impl ApplicationStore for DynamoDBApplicationStore {
    #[instrument(skip(self, application), fields(application_id = %application.id))]
    async fn insert(&self, application: Application) -> StoreResult<Application> {
        let start = Instant::now();
        let application = application.truncated_to_millis();
        let result = self.put_new(&application).await.map(|_| application);
        record_operation(BACKEND, "insert", start, &result);
        result
    }

    async fn get(&self, id: &str) -> StoreResult<Application> {
        let start = Instant::now();
        let result = self
            .fetch(id)
            .await
            .and_then(|app| app.ok_or_else(|| StoreError::NotFound(id.to_string())));
        record_operation(BACKEND, "get", start, &result);
        result
    }

    #[instrument(skip(self, mutation))]
    async fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutation: ApplicationMutation,
    ) -> StoreResult<Application> {
        let start = Instant::now();
        let result = self.put_guarded(id, expected_version, &mutation).await;
        record_operation(BACKEND, "conditional_update", start, &result);
        result
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let start = Instant::now();
        let result = self.delete_item(id).await;
        record_operation(BACKEND, "delete", start, &result);
        result
    }

    async fn find_by_state(
        &self,
        state: ApplicationState,
        pagination_key: Option<&PaginationKey>,
        limit: Option<usize>,
    ) -> StoreResult<Page> {
        let start = Instant::now();
        let result = self
            .query_state(state, pagination_key, effective_limit(limit))
            .await;
        record_operation(BACKEND, "find_by_state", start, &result);
        result
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
