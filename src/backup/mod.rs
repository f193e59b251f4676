//! The backup run: export yesterday's recordings of every active customer.
//!
//! A run walks the customers one after another. The records of a customer are processed
//! side by side, bounded by `RECORD_CONCURRENCY`, while a run-wide pool of
//! `MAX_IN_FLIGHT` permits caps the downloads and uploads in progress at any time.
//!
//! Per record the pipeline is: download, stage to disk, upload, acknowledge, then drop
//! the staged file. Any failure is logged and affects only the record (or customer) at
//! hand. A failed upload or acknowledge leaves the staged file behind.

use crate::archive::{ArchiveStore, archive_key};
use crate::billing::BillingApi;
use crate::config::BackupSettings;
use crate::errors::{ErrorKind, error_kind};
use crate::records::{CustomerDirectory, RecordStore};
use crate::tools::watch::Watch;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use report::{BackupReport, RecordOutcome};
use staging::StagingArea;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::Instrument;
use window::ExportWindow;

pub mod report;
pub mod staging;
pub mod window;

/// Something the scheduler can trigger.
#[async_trait]
pub trait BackupJob: Send + Sync {
    async fn run(&self, now: DateTime<Utc>) -> BackupReport;
}

pub struct BackupOrchestrator {
    directory: Arc<dyn CustomerDirectory>,
    billing: Arc<dyn BillingApi>,
    archive: Arc<dyn ArchiveStore>,
    records: Arc<dyn RecordStore>,
    staging: StagingArea,
    record_concurrency: usize,
    max_in_flight: usize,
}

impl BackupOrchestrator {
    pub fn new(
        directory: Arc<dyn CustomerDirectory>,
        billing: Arc<dyn BillingApi>,
        archive: Arc<dyn ArchiveStore>,
        records: Arc<dyn RecordStore>,
        settings: &BackupSettings,
    ) -> Self {
        Self {
            directory,
            billing,
            archive,
            records,
            staging: StagingArea::new(&settings.staging_dir),
            record_concurrency: settings.record_concurrency.max(1),
            max_in_flight: settings.max_in_flight.max(1),
        }
    }

    /// Exports all recordings within `window`.
    pub async fn run_window(&self, window: &ExportWindow) -> BackupReport {
        let watch = Watch::start();
        let mut report = BackupReport::default();

        if let Err(err) = self.staging.prepare().await {
            tracing::error!("Cannot run backup: {:#}", err);
            return report;
        }

        let customers = match self.directory.list_customer_ids().await {
            Ok(customers) => customers,
            Err(err) => {
                tracing::error!(
                    operation = "list_customers",
                    "Failed to enumerate customers: {:#}",
                    err
                );
                return report;
            }
        };

        tracing::info!(
            customers = customers.len(),
            "Exporting recordings of {}...",
            window
        );
        report.customers = customers.len();

        let permits = Semaphore::new(self.max_in_flight);
        for customer in &customers {
            self.backup_customer(&permits, customer, window, &mut report)
                .instrument(tracing::info_span!("customer", customer = customer.as_str()))
                .await;
        }

        tracing::info!(
            duration_ms = watch.elapsed_ms(),
            "Backup of {} completed: {}",
            window.date_key(),
            report
        );

        report
    }

    async fn backup_customer(
        &self,
        permits: &Semaphore,
        customer: &str,
        window: &ExportWindow,
        report: &mut BackupReport,
    ) {
        let records = match self.billing.list_records(customer, window).await {
            Ok(records) => records,
            Err(err) => {
                let kind = error_kind(&err);
                tracing::error!(
                    customer,
                    operation = "list_records",
                    kind = kind_name(kind),
                    "Skipping customer: {:#}",
                    err
                );
                report.customer_failed(kind);
                return;
            }
        };

        let date = window.date_key();
        let outcomes: Vec<RecordOutcome> = stream::iter(records)
            .map(|record| {
                self.backup_record(permits, customer, &date, record.i_xdr)
                    .instrument(tracing::info_span!("record", i_xdr = record.i_xdr))
            })
            .buffer_unordered(self.record_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
    }

    async fn backup_record(
        &self,
        permits: &Semaphore,
        customer: &str,
        date: &str,
        i_xdr: i64,
    ) -> RecordOutcome {
        let watch = Watch::start();

        match self.export_record(permits, customer, date, i_xdr).await {
            Ok(outcome) => {
                tracing::debug!(
                    customer,
                    i_xdr,
                    duration_ms = watch.elapsed_ms(),
                    "Record done: {:?}",
                    outcome
                );
                outcome
            }
            Err(err) => {
                let kind = error_kind(&err);
                tracing::error!(
                    customer,
                    i_xdr,
                    kind = kind_name(kind),
                    "Failed to export record: {:#}",
                    err
                );
                RecordOutcome::Failed(kind)
            }
        }
    }

    async fn export_record(
        &self,
        permits: &Semaphore,
        customer: &str,
        date: &str,
        i_xdr: i64,
    ) -> anyhow::Result<RecordOutcome> {
        let key = archive_key(customer, date, i_xdr);
        if self.is_archived(i_xdr, &key).await {
            return Ok(RecordOutcome::Skipped);
        }

        let audio = {
            let _permit = permits.acquire().await.context("Permit pool was closed")?;
            self.billing.fetch_recording(i_xdr).await?
        };

        let staged = self.staging.stage(customer, i_xdr, &audio).await?;
        drop(audio);

        {
            let _permit = permits.acquire().await.context("Permit pool was closed")?;
            self.archive
                .upload(&staged, &key)
                .await
                .with_context(|| format!("Failed to upload '{}', keeping it staged", key))?;
        }

        self.records
            .acknowledge(i_xdr, &key)
            .await
            .with_context(|| format!("Uploaded '{}' but failed to acknowledge it", key))?;

        if let Err(err) = self.staging.discard(&staged).await {
            tracing::warn!(customer, i_xdr, "Exported record left a staged file: {:#}", err);
        }

        Ok(RecordOutcome::Exported)
    }

    /// Checks the idempotency marker. Only an acknowledgement under `key` counts, a failed
    /// lookup counts as "not yet archived".
    async fn is_archived(&self, i_xdr: i64, key: &str) -> bool {
        match self.records.archive_path(i_xdr).await {
            Ok(Some(path)) if path == key => {
                tracing::debug!(i_xdr, "Already archived as '{}'", path);
                true
            }
            Ok(Some(path)) => {
                tracing::warn!(
                    i_xdr,
                    "Record is acknowledged as '{}' instead of '{}', exporting it again",
                    path,
                    key
                );
                false
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(
                    i_xdr,
                    "Cannot determine if the record is archived, exporting it: {:#}",
                    err
                );
                false
            }
        }
    }
}

#[async_trait]
impl BackupJob for BackupOrchestrator {
    /// Exports the day before `now`, as seen in UTC+6.
    #[tracing::instrument(name = "backup", skip(self, now), fields(now = %now))]
    async fn run(&self, now: DateTime<Utc>) -> BackupReport {
        match ExportWindow::previous_day(now) {
            Ok(window) => self.run_window(&window).await,
            Err(err) => {
                tracing::error!("Cannot determine the export window: {:#}", err);
                BackupReport::default()
            }
        }
    }
}

fn kind_name(kind: Option<ErrorKind>) -> &'static str {
    kind.map(|kind| kind.name()).unwrap_or("unclassified")
}
