//! Where customers come from and where exported records are marked as archived.

use async_trait::async_trait;

#[cfg(feature = "aws_dynamodb")]
pub mod dynamo;

/// Yields the customers whose recordings are exported.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Returns the linked customer id of every active user, in a stable order.
    async fn list_customer_ids(&self) -> anyhow::Result<Vec<String>>;
}

/// Bookkeeping of which call records are already archived.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Stores the archive key of an uploaded recording.
    async fn acknowledge(&self, i_xdr: i64, archive_path: &str) -> anyhow::Result<()>;

    /// Returns the archive key stored by a previous [`RecordStore::acknowledge`], if any.
    async fn archive_path(&self, i_xdr: i64) -> anyhow::Result<Option<String>>;
}
