//! DynamoDB backed [`CustomerDirectory`] and [`RecordStore`].
//!
//! Users live in the `users` table and carry `isActive` and `iCustomer`. Archived
//! records are tracked in `xdrs`, keyed by the numeric `iXdr`.

use crate::aws::dynamodb::{DynamoClient, attribute, get_str, scan_all, with_hash_index};
use crate::errors::ResultExt;
use crate::records::{CustomerDirectory, RecordStore};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, BillingMode, ScalarAttributeType};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

const TABLE_USERS: &str = "users";
const TABLE_XDRS: &str = "xdrs";

const FIELD_I_XDR: &str = "iXdr";
const FIELD_ARCHIVE_PATH: &str = "archivePath";
const FIELD_ARCHIVED_AT: &str = "archivedAt";

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize, Debug)]
struct UserEntry {
    #[serde(rename = "iCustomer")]
    i_customer: String,
}

pub struct DynamoCustomerDirectory {
    client: DynamoClient,
}

impl DynamoCustomerDirectory {
    pub fn new(client: &DynamoClient) -> Self {
        Self {
            client: client.clone(),
        }
    }
}

#[async_trait]
impl CustomerDirectory for DynamoCustomerDirectory {
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn list_customer_ids(&self) -> anyhow::Result<Vec<String>> {
        let scan = self
            .client
            .scan(TABLE_USERS)
            .filter_expression("isActive = :active AND attribute_type(iCustomer, :string)")
            .expression_attribute_values(":active", AttributeValue::Bool(true))
            .expression_attribute_values(":string", AttributeValue::S("S".to_owned()))
            .projection_expression("iCustomer");

        let users: Vec<UserEntry> = scan_all(scan)
            .await
            .context("Failed to enumerate active users")?;

        Ok(customer_ids(users))
    }
}

/// Trimmed, non-empty customer ids in ascending order.
///
/// Several users may share a customer, which is still exported only once.
fn customer_ids(users: Vec<UserEntry>) -> Vec<String> {
    let customers: BTreeSet<String> = users
        .into_iter()
        .map(|user| user.i_customer.trim().to_owned())
        .filter(|customer| !customer.is_empty())
        .collect();

    customers.into_iter().collect()
}

pub struct DynamoRecordStore {
    client: DynamoClient,
}

impl DynamoRecordStore {
    /// Creates the store, setting up the `xdrs` table if required.
    #[tracing::instrument(skip(client), err(Display))]
    pub async fn with_client(client: &DynamoClient) -> anyhow::Result<Self> {
        client
            .create_table(TABLE_XDRS, |table| {
                let table =
                    table.attribute_definitions(attribute(FIELD_I_XDR, ScalarAttributeType::N)?);
                let table = with_hash_index(table, FIELD_I_XDR)?;

                Ok(table.billing_mode(BillingMode::PayPerRequest))
            })
            .await?;

        Ok(Self {
            client: client.clone(),
        })
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn acknowledge(&self, i_xdr: i64, archive_path: &str) -> anyhow::Result<()> {
        let update = self
            .client
            .update_item(TABLE_XDRS)
            .key(FIELD_I_XDR, AttributeValue::N(i_xdr.to_string()))
            .update_expression("SET #path = :path, #at = :at")
            .expression_attribute_names("#path", FIELD_ARCHIVE_PATH)
            .expression_attribute_names("#at", FIELD_ARCHIVED_AT)
            .expression_attribute_values(":path", AttributeValue::S(archive_path.to_owned()))
            .expression_attribute_values(":at", AttributeValue::S(Utc::now().to_rfc3339()))
            .send();

        let _ = tokio::time::timeout(WRITE_TIMEOUT, update)
            .await
            .with_context(|| format!("Acknowledging record {} timed out", i_xdr))
            .mark_acknowledge()?
            .with_context(|| format!("Failed to acknowledge record {}", i_xdr))
            .mark_acknowledge()?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn archive_path(&self, i_xdr: i64) -> anyhow::Result<Option<String>> {
        let result = self
            .client
            .get_item(TABLE_XDRS)
            .key(FIELD_I_XDR, AttributeValue::N(i_xdr.to_string()))
            .consistent_read(true)
            .send()
            .await
            .with_context(|| format!("Failed to read record {}", i_xdr))?;

        Ok(result
            .item
            .as_ref()
            .and_then(|item| get_str(item, FIELD_ARCHIVE_PATH))
            .filter(|path| !path.is_empty())
            .map(str::to_owned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_entries_read_the_linked_customer() {
        let mut item = std::collections::HashMap::new();
        item.insert("iCustomer".to_string(), AttributeValue::S("4821".to_string()));

        let user: UserEntry = serde_dynamo::aws_sdk_dynamodb_1::from_item(item).unwrap();
        assert_eq!(user.i_customer, "4821");
    }

    fn users(ids: &[&str]) -> Vec<UserEntry> {
        ids.iter()
            .map(|id| UserEntry {
                i_customer: id.to_string(),
            })
            .collect()
    }

    #[test]
    fn customers_are_listed_once_in_ascending_order() {
        let ids = customer_ids(users(&["4822", "4821", "4822", "100", "4821"]));

        assert_eq!(ids, vec!["100", "4821", "4822"]);
    }

    #[test]
    fn blank_customer_ids_are_dropped_and_others_trimmed() {
        let ids = customer_ids(users(&["", "   ", " 4821", "4821 ", "\t4822\n"]));

        assert_eq!(ids, vec!["4821", "4822"]);
    }

    #[test]
    fn no_users_means_no_customers() {
        assert!(customer_ids(Vec::new()).is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn acknowledged_records_report_their_archive_path() {
        let config = crate::aws::load_sdk_config().await;
        let client = DynamoClient::new(&config, "xdr-archiver-test");
        let store = DynamoRecordStore::with_client(&client).await.unwrap();
        let i_xdr = i64::from(rand::random::<u32>());

        assert_eq!(store.archive_path(i_xdr).await.unwrap(), None);

        store
            .acknowledge(i_xdr, "4821/2024-03-01/recording_555.wav")
            .await
            .unwrap();
        assert_eq!(
            store.archive_path(i_xdr).await.unwrap().as_deref(),
            Some("4821/2024-03-01/recording_555.wav")
        );
    }
}
