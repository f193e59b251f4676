//! In-memory collaborators for exercising the pipeline without external services.

use crate::archive::ArchiveStore;
use crate::backup::window::ExportWindow;
use crate::billing::BillingApi;
use crate::billing::model::CallRecord;
use crate::errors::ResultExt;
use crate::kind_bail;
use crate::records::{CustomerDirectory, RecordStore};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const RECORDING: &[u8] = b"RIFF\x24\x00\x00\x00WAVE";

pub struct FakeDirectory {
    customers: Option<Vec<String>>,
}

impl FakeDirectory {
    pub fn new(customers: &[&str]) -> Self {
        Self {
            customers: Some(customers.iter().map(|c| c.to_string()).collect()),
        }
    }

    pub fn failing() -> Self {
        Self { customers: None }
    }
}

#[async_trait]
impl CustomerDirectory for FakeDirectory {
    async fn list_customer_ids(&self) -> anyhow::Result<Vec<String>> {
        self.customers
            .clone()
            .context("user directory unavailable")
    }
}

#[derive(Default)]
pub struct FakeBilling {
    records: HashMap<String, Vec<CallRecord>>,
    failing_customers: HashSet<String>,
    missing_recordings: HashSet<i64>,
    fetch_delay: Duration,
    pub listed: Mutex<Vec<(String, ExportWindow)>>,
    pub fetched: Mutex<Vec<i64>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeBilling {
    pub fn with_records(mut self, customer: &str, records: &[i64]) -> Self {
        let _ = self.records.insert(
            customer.to_string(),
            records.iter().map(|i_xdr| CallRecord::new(*i_xdr)).collect(),
        );
        self
    }

    pub fn failing_customer(mut self, customer: &str) -> Self {
        let _ = self.failing_customers.insert(customer.to_string());
        self
    }

    pub fn missing_recording(mut self, i_xdr: i64) -> Self {
        let _ = self.missing_recordings.insert(i_xdr);
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn fetched(&self) -> Vec<i64> {
        let mut fetched = self.fetched.lock().unwrap().clone();
        fetched.sort();
        fetched
    }
}

#[async_trait]
impl BillingApi for FakeBilling {
    async fn list_records(
        &self,
        customer: &str,
        window: &ExportWindow,
    ) -> anyhow::Result<Vec<CallRecord>> {
        self.listed
            .lock()
            .unwrap()
            .push((customer.to_string(), *window));

        if self.failing_customers.contains(customer) {
            return Err(anyhow::anyhow!("connection reset")).mark_transport();
        }

        Ok(self.records.get(customer).cloned().unwrap_or_default())
    }

    async fn fetch_recording(&self, i_xdr: i64) -> anyhow::Result<Bytes> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.fetched.lock().unwrap().push(i_xdr);
        if self.missing_recordings.contains(&i_xdr) {
            kind_bail!(crate::errors::ErrorKind::Transport, "timed out");
        }

        Ok(Bytes::from_static(RECORDING))
    }
}

#[derive(Default)]
pub struct FakeArchive {
    failing_keys: HashSet<String>,
    existing_keys: Vec<String>,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeArchive {
    pub fn failing_key(mut self, key: &str) -> Self {
        let _ = self.failing_keys.insert(key.to_string());
        self
    }

    pub fn with_keys(mut self, keys: &[&str]) -> Self {
        self.existing_keys
            .extend(keys.iter().map(|key| key.to_string()));
        self
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArchiveStore for FakeArchive {
    async fn upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()> {
        let content = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Cannot read '{}'", local_path.display()))
            .mark_storage()?;

        if self.failing_keys.contains(key) {
            return Err(anyhow::anyhow!("access denied")).mark_transport();
        }

        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), content));
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let uploaded = self.uploaded_keys();
        let mut keys: Vec<String> = self
            .existing_keys
            .iter()
            .chain(uploaded.iter())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();

        Ok(keys)
    }
}

#[derive(Default)]
pub struct FakeRecords {
    failing: HashSet<i64>,
    paths: Mutex<HashMap<i64, String>>,
    pub acknowledged: Mutex<Vec<(i64, String)>>,
}

impl FakeRecords {
    pub fn failing(mut self, i_xdr: i64) -> Self {
        let _ = self.failing.insert(i_xdr);
        self
    }

    pub fn archived(self, i_xdr: i64, path: &str) -> Self {
        let _ = self.paths.lock().unwrap().insert(i_xdr, path.to_string());
        self
    }

    pub fn acknowledged(&self) -> Vec<(i64, String)> {
        let mut acknowledged = self.acknowledged.lock().unwrap().clone();
        acknowledged.sort();
        acknowledged
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn acknowledge(&self, i_xdr: i64, archive_path: &str) -> anyhow::Result<()> {
        if self.failing.contains(&i_xdr) {
            return Err(anyhow::anyhow!("throughput exceeded")).mark_acknowledge();
        }

        self.acknowledged
            .lock()
            .unwrap()
            .push((i_xdr, archive_path.to_string()));
        let _ = self
            .paths
            .lock()
            .unwrap()
            .insert(i_xdr, archive_path.to_string());

        Ok(())
    }

    async fn archive_path(&self, i_xdr: i64) -> anyhow::Result<Option<String>> {
        Ok(self.paths.lock().unwrap().get(&i_xdr).cloned())
    }
}
