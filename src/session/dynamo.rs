//! [`SessionStore`] backed by a DynamoDB table, shared by every process of the service.
//!
//! Items carry their expiry as epoch seconds in `expiresAt`, which is also registered as
//! the table's TTL attribute. DynamoDB purges expired items lazily (often hours late),
//! so reads compare `expiresAt` against the clock themselves.

use crate::aws::dynamodb::{DynamoClient, attribute, get_i64, get_str, with_hash_index};
use crate::session::SessionStore;
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, BillingMode, ScalarAttributeType};
use chrono::Utc;
use std::time::Duration;

const TABLE_SESSIONS: &str = "sessions";
const FIELD_KEY: &str = "key";
const FIELD_VALUE: &str = "value";
const FIELD_EXPIRES_AT: &str = "expiresAt";

pub struct DynamoSessionStore {
    client: DynamoClient,
}

impl DynamoSessionStore {
    /// Creates the store, setting up the table and its TTL attribute if required.
    #[tracing::instrument(skip(client), err(Display))]
    pub async fn with_client(client: &DynamoClient) -> anyhow::Result<Self> {
        client
            .create_table(TABLE_SESSIONS, |table| {
                let table =
                    table.attribute_definitions(attribute(FIELD_KEY, ScalarAttributeType::S)?);
                let table = with_hash_index(table, FIELD_KEY)?;

                Ok(table.billing_mode(BillingMode::PayPerRequest))
            })
            .await?;
        client.enable_ttl(TABLE_SESSIONS, FIELD_EXPIRES_AT).await?;

        Ok(Self {
            client: client.clone(),
        })
    }
}

#[async_trait]
impl SessionStore for DynamoSessionStore {
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let result = self
            .client
            .get_item(TABLE_SESSIONS)
            .key(FIELD_KEY, AttributeValue::S(key.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .with_context(|| format!("Failed to read '{}' from the session table", key))?;

        let Some(item) = result.item else {
            return Ok(None);
        };

        let expires_at = get_i64(&item, FIELD_EXPIRES_AT).unwrap_or_default();
        if expires_at <= Utc::now().timestamp() {
            return Ok(None);
        }

        Ok(get_str(&item, FIELD_VALUE).map(str::to_owned))
    }

    #[tracing::instrument(level = "debug", skip(self, value), err(Display))]
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;

        let _ = self
            .client
            .put_item(TABLE_SESSIONS)
            .item(FIELD_KEY, AttributeValue::S(key.to_owned()))
            .item(FIELD_VALUE, AttributeValue::S(value.to_owned()))
            .item(FIELD_EXPIRES_AT, AttributeValue::N(expires_at.to_string()))
            .send()
            .await
            .with_context(|| format!("Failed to store '{}' in the session table", key))?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _ = self
            .client
            .delete_item(TABLE_SESSIONS)
            .key(FIELD_KEY, AttributeValue::S(key.to_owned()))
            .send()
            .await
            .with_context(|| format!("Failed to delete '{}' from the session table", key))?;

        Ok(())
    }
}
