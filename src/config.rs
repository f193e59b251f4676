//! Process configuration.
//!
//! All settings are read once at startup by [`Settings::from_env`] and handed to the
//! components that need them. Nothing in the crate reads configuration lazily.

use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_STAGING_DIR: &str = "./staging";
const DEFAULT_BACKUP_INTERVAL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_RECORD_CONCURRENCY: usize = 4;
const DEFAULT_MAX_IN_FLIGHT: usize = 8;
const DEFAULT_BILLING_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_TABLE_PREFIX: &str = "xdr-archiver";

/// Credentials and location of the billing service.
#[derive(Clone)]
pub struct BillingSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub retry_attempts: u32,
}

impl std::fmt::Debug for BillingSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .finish()
    }
}

/// Target of the archived recordings.
#[derive(Clone, Debug)]
pub struct ArchiveSettings {
    pub bucket: String,
    pub endpoint_url: Option<String>,
}

/// Tuning knobs of a single backup run and of the scheduler driving it.
#[derive(Clone, Debug)]
pub struct BackupSettings {
    pub staging_dir: PathBuf,
    pub interval: Duration,
    pub record_concurrency: usize,
    pub max_in_flight: usize,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub billing: BillingSettings,
    pub archive: ArchiveSettings,
    pub backup: BackupSettings,
    /// Prepended to every DynamoDB table name.
    pub table_prefix: String,
}

impl Settings {
    /// Builds the settings from environment variables.
    ///
    /// # Errors
    ///
    /// Fails if a required variable is missing or a numeric variable cannot be parsed.
    pub fn from_env() -> anyhow::Result<Settings> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the settings using the given lookup function instead of the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("No {} provided in environment", name))
        };

        let billing = BillingSettings {
            base_url: required("PORTAONE_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            username: required("PORTAONE_USERNAME")?,
            password: required("PORTAONE_PASSWORD")?,
            timeout: Duration::from_secs(parse_or(
                &lookup,
                "BILLING_TIMEOUT_SECONDS",
                DEFAULT_BILLING_TIMEOUT_SECONDS,
            )?),
            retry_attempts: parse_or(&lookup, "RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?.max(1),
        };

        let archive = ArchiveSettings {
            bucket: required("S3_BUCKET_NAME")?,
            endpoint_url: lookup("S3_ENDPOINT_URL").filter(|url| !url.is_empty()),
        };

        let backup = BackupSettings {
            staging_dir: lookup("STAGING_DIR")
                .filter(|dir| !dir.is_empty())
                .unwrap_or_else(|| DEFAULT_STAGING_DIR.to_string())
                .into(),
            interval: Duration::from_secs(
                parse_or(
                    &lookup,
                    "BACKUP_INTERVAL_SECONDS",
                    DEFAULT_BACKUP_INTERVAL_SECONDS,
                )?
                .max(1),
            ),
            record_concurrency: parse_or(&lookup, "RECORD_CONCURRENCY", DEFAULT_RECORD_CONCURRENCY)?
                .max(1),
            max_in_flight: parse_or(&lookup, "MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?.max(1),
        };

        Ok(Settings {
            billing,
            archive,
            backup,
            table_prefix: lookup("DYNAMO_TABLE_PREFIX")
                .filter(|prefix| !prefix.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TABLE_PREFIX.to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name).filter(|value| !value.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value '{}' for {}", value, name)),
        None => Ok(default),
    }
}
