//! Detection of archived recordings whose record was never acknowledged.
//!
//! Upload and acknowledge are two separate writes. If the second one fails, the
//! recording exists in the archive while the record store does not know about it.
//! [`Reconciler::find_orphans`] lists such objects for a customer and day.

use crate::archive::{ArchiveStore, archive_prefix, parse_record_id};
use crate::records::RecordStore;
use chrono::NaiveDate;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// An archived object without a matching acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Orphan {
    pub key: String,
    /// `None` if the key does not follow the archive layout.
    pub i_xdr: Option<i64>,
    /// What the record store knows about the record, if anything.
    pub recorded_path: Option<String>,
}

impl Display for Orphan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (&self.i_xdr, &self.recorded_path) {
            (None, _) => write!(f, "{}: not a recording key", self.key),
            (Some(i_xdr), None) => write!(f, "{}: record {} is not acknowledged", self.key, i_xdr),
            (Some(i_xdr), Some(path)) => write!(
                f,
                "{}: record {} is acknowledged as '{}'",
                self.key, i_xdr, path
            ),
        }
    }
}

pub struct Reconciler {
    archive: Arc<dyn ArchiveStore>,
    records: Arc<dyn RecordStore>,
}

impl Reconciler {
    pub fn new(archive: Arc<dyn ArchiveStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { archive, records }
    }

    /// Compares the archive contents of `customer` on `date` against the record store.
    #[tracing::instrument(skip(self), err(Display))]
    pub async fn find_orphans(
        &self,
        customer: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<Orphan>> {
        let prefix = format!(
            "{}/",
            archive_prefix(customer, &date.format("%Y-%m-%d").to_string())
        );
        let keys = self.archive.list_keys(&prefix).await?;
        let mut orphans = Vec::new();

        for key in keys {
            let Some(i_xdr) = parse_record_id(&key) else {
                orphans.push(Orphan {
                    key,
                    i_xdr: None,
                    recorded_path: None,
                });
                continue;
            };

            let recorded_path = self.records.archive_path(i_xdr).await?;
            if recorded_path.as_deref() != Some(key.as_str()) {
                orphans.push(Orphan {
                    key,
                    i_xdr: Some(i_xdr),
                    recorded_path,
                });
            }
        }

        tracing::info!(
            customer,
            orphans = orphans.len(),
            "Reconciled archive of {}",
            date
        );

        Ok(orphans)
    }
}
