//! DynamoDB client with table prefix support.
//!
//! All table names are prefixed with the configured prefix, so the logical table
//! `sessions` becomes `{prefix}-sessions`.

use anyhow::Context;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::BuildError;
use aws_sdk_dynamodb::operation::create_table::builders::CreateTableFluentBuilder;
use aws_sdk_dynamodb::operation::delete_item::builders::DeleteItemFluentBuilder;
use aws_sdk_dynamodb::operation::get_item::builders::GetItemFluentBuilder;
use aws_sdk_dynamodb::operation::put_item::builders::PutItemFluentBuilder;
use aws_sdk_dynamodb::operation::scan::builders::ScanFluentBuilder;
use aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, KeySchemaElement, KeyType, ScalarAttributeType,
    TableStatus, TimeToLiveSpecification,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone, Debug)]
pub struct DynamoClient {
    pub client: Client,
    table_prefix: String,
}

impl DynamoClient {
    pub fn new(config: &aws_config::SdkConfig, table_prefix: &str) -> DynamoClient {
        tracing::info!("Setting up DynamoDB with table prefix '{}'...", table_prefix);

        DynamoClient {
            client: Client::new(config),
            table_prefix: table_prefix.to_owned(),
        }
    }

    /// Returns the effective table name with prefix applied.
    pub fn effective_name(&self, table: &str) -> String {
        format!("{}-{}", self.table_prefix, table)
    }

    pub async fn does_table_exist(&self, name: &str) -> anyhow::Result<bool> {
        let effective_name = self.effective_name(name);

        match self
            .client
            .describe_table()
            .table_name(&effective_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context(format!("Cannot access DynamoDB table '{}'", effective_name)),
        }
    }

    /// Creates a table unless it already exists and waits for it to become `ACTIVE`.
    ///
    /// The callback receives a builder with the table name already set.
    pub async fn create_table<F>(&self, name: &str, callback: F) -> anyhow::Result<()>
    where
        F: FnOnce(CreateTableFluentBuilder) -> Result<CreateTableFluentBuilder, BuildError>,
    {
        let effective_name = self.effective_name(name);

        if self.does_table_exist(name).await? {
            tracing::debug!("Table '{}' already exists.", effective_name);
            return Ok(());
        }

        tracing::info!("Table '{}' does not exist. Creating...", effective_name);
        let _ = callback(self.client.create_table().table_name(&effective_name))
            .with_context(|| {
                format!(
                    "Failed to build proper create table request for: {}",
                    &effective_name
                )
            })?
            .send()
            .await
            .with_context(|| format!("Failed to create DynamoDB table '{}'", &effective_name))?;

        self.wait_until_table_becomes_active(&effective_name)
            .await?;
        tracing::info!("Table '{}' was successfully created", effective_name);

        Ok(())
    }

    /// Lets DynamoDB purge items once the epoch seconds in `attribute` have passed.
    pub async fn enable_ttl(&self, name: &str, attribute: &str) -> anyhow::Result<()> {
        let effective_name = self.effective_name(name);

        let description = self
            .client
            .describe_time_to_live()
            .table_name(&effective_name)
            .send()
            .await
            .with_context(|| format!("Failed to read TTL settings of '{}'", effective_name))?;

        let already_enabled = description
            .time_to_live_description()
            .and_then(|ttl| ttl.attribute_name())
            .map(|current| current == attribute)
            .unwrap_or(false);
        if already_enabled {
            return Ok(());
        }

        let _ = self
            .client
            .update_time_to_live()
            .table_name(&effective_name)
            .time_to_live_specification(
                TimeToLiveSpecification::builder()
                    .attribute_name(attribute)
                    .enabled(true)
                    .build()?,
            )
            .send()
            .await
            .with_context(|| format!("Failed to enable TTL on '{}'", effective_name))?;

        tracing::info!(
            "Enabled TTL on attribute '{}' of table '{}'",
            attribute,
            effective_name
        );

        Ok(())
    }

    async fn wait_until_table_becomes_active(&self, effective_name: &str) -> anyhow::Result<()> {
        for _ in 0..15 {
            let resp = self
                .client
                .describe_table()
                .table_name(effective_name)
                .send()
                .await
                .with_context(|| format!("Failed to check table status of '{}'", effective_name))?;

            let status = resp
                .table()
                .and_then(|t| t.table_status())
                .unwrap_or(&TableStatus::Creating);

            if status == &TableStatus::Active {
                return Ok(());
            }

            sleep(Duration::from_secs(10)).await;
        }

        anyhow::bail!("Table '{}' did not become ACTIVE in time", effective_name);
    }

    pub fn put_item(&self, table_name: &str) -> PutItemFluentBuilder {
        self.client
            .put_item()
            .table_name(self.effective_name(table_name))
    }

    pub fn get_item(&self, table_name: &str) -> GetItemFluentBuilder {
        self.client
            .get_item()
            .table_name(self.effective_name(table_name))
    }

    pub fn update_item(&self, table_name: &str) -> UpdateItemFluentBuilder {
        self.client
            .update_item()
            .table_name(self.effective_name(table_name))
    }

    pub fn delete_item(&self, table_name: &str) -> DeleteItemFluentBuilder {
        self.client
            .delete_item()
            .table_name(self.effective_name(table_name))
    }

    pub fn scan(&self, table_name: &str) -> ScanFluentBuilder {
        self.client.scan().table_name(self.effective_name(table_name))
    }
}

/// Creates an attribute definition of the given scalar type.
pub fn attribute(
    name: &str,
    attribute_type: ScalarAttributeType,
) -> Result<AttributeDefinition, BuildError> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(attribute_type)
        .build()
}

/// Adds a hash-only primary key to the table.
pub fn with_hash_index(
    builder: CreateTableFluentBuilder,
    hash_attribute: &str,
) -> Result<CreateTableFluentBuilder, BuildError> {
    Ok(builder.key_schema(
        KeySchemaElement::builder()
            .attribute_name(hash_attribute)
            .key_type(KeyType::Hash)
            .build()?,
    ))
}

/// Runs a scan over all pages and deserializes every item.
pub async fn scan_all<E: DeserializeOwned>(scan: ScanFluentBuilder) -> anyhow::Result<Vec<E>> {
    let mut entities = Vec::new();
    let mut last_key: Option<HashMap<String, AttributeValue>> = None;

    loop {
        let result = scan
            .clone()
            .set_exclusive_start_key(last_key.take())
            .send()
            .await
            .context("Error executing paginated scan")?;

        for item in result.items.unwrap_or_default() {
            entities.push(
                serde_dynamo::aws_sdk_dynamodb_1::from_item(item)
                    .context("Failed to deserialize DynamoDB item")?,
            );
        }

        match result.last_evaluated_key {
            Some(next_key) if !next_key.is_empty() => last_key = Some(next_key),
            _ => return Ok(entities),
        }
    }
}

/// Reads a string attribute from an item.
pub fn get_str<'a>(item: &'a HashMap<String, AttributeValue>, name: &str) -> Option<&'a str> {
    item.get(name).and_then(|value| value.as_s().ok()).map(String::as_str)
}

/// Reads a numeric attribute from an item.
pub fn get_i64(item: &HashMap<String, AttributeValue>, name: &str) -> Option<i64> {
    item.get(name)
        .and_then(|value| value.as_n().ok())
        .and_then(|value| value.parse().ok())
}
