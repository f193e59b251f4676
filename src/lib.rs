//! # XDR Archiver
//!
//! Exports the call recordings of the previous day from the billing service into
//! S3-compatible object storage and marks every exported call record (XDR) with the key
//! it was archived under.
//!
//! ## Modules
//!
//! - [`session`] - Cached billing session token with single-flight login
//! - [`billing`] - Client of the billing service's REST API
//! - [`archive`] - Upload of recordings into the archive bucket
//! - [`records`] - Customer directory and acknowledgement of exported records
//! - [`backup`] - The backup run itself, including the export window and staging area
//! - [`reconcile`] - Detection of archived but unacknowledged recordings
//! - [`scheduler`] - Periodic, non-overlapping trigger of the backup
//! - [`logging`] - Tracing setup with optional OpenTelemetry export
//! - [`tools`] - Retry with backoff, stopwatch, graceful shutdown
//!
//! ## Feature Flags
//!
//! - `aws_dynamodb` (default) - DynamoDB backed session store, directory and record store
//! - `pretty_logs` - Colorful console output for development
//! - `open_telemetry` - OpenTelemetry tracing export
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_NAME` | Application identifier | `XDR-ARCHIVER` |
//! | `APP_VERSION` | Version string | `DEVELOPMENT-SNAPSHOT-VERSION` |
//! | `PORTAONE_BASE_URL` | Base URL of the billing service | (required) |
//! | `PORTAONE_USERNAME` | Operator login | (required) |
//! | `PORTAONE_PASSWORD` | Operator password | (required) |
//! | `S3_BUCKET_NAME` | Archive bucket | (required) |
//! | `S3_ENDPOINT_URL` | Endpoint of an S3-compatible store | AWS |
//! | `STAGING_DIR` | Local spool directory | `./staging` |
//! | `BACKUP_INTERVAL_SECONDS` | Scheduler interval | `86400` |
//! | `RECORD_CONCURRENCY` | Records processed side by side per customer | `4` |
//! | `MAX_IN_FLIGHT` | Downloads and uploads in progress per run | `8` |
//! | `BILLING_TIMEOUT_SECONDS` | Timeout of a single billing call | `30` |
//! | `RETRY_ATTEMPTS` | Attempts for transient failures | `3` |
//! | `DYNAMO_TABLE_PREFIX` | Prefix of all DynamoDB tables | `xdr-archiver` |
//! | `RUST_LOG` | Log filter | `info` |
//! | `RUST_TRACE` | Span filter for OpenTelemetry export | `debug` |
//!
//! AWS credentials and region are picked up from the standard AWS environment.

use std::env;
use std::sync::LazyLock;

pub mod archive;
pub mod aws;
pub mod backup;
pub mod billing;
pub mod config;
pub mod errors;
pub mod logging;
pub mod records;
pub mod reconcile;
pub mod scheduler;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub static APP_NAME: LazyLock<String> =
    LazyLock::new(|| env::var("APP_NAME").unwrap_or("XDR-ARCHIVER".to_string()));

pub static APP_VERSION: LazyLock<String> =
    LazyLock::new(|| env::var("APP_VERSION").unwrap_or("DEVELOPMENT-SNAPSHOT-VERSION".to_string()));
