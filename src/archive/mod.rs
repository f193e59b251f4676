//! Durable storage of exported recordings.
//!
//! Objects are laid out as `{customer}/{YYYY-MM-DD}/recording_{i_xdr}.wav`. Uploading
//! the same key twice replaces the previous object.

use async_trait::async_trait;
use std::path::Path;

pub mod s3;

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Uploads the file at `local_path` under `key`.
    ///
    /// # Errors
    ///
    /// Fails with a `Storage` error if the local file cannot be read and with a
    /// `Transport` error if the object store refuses or cannot be reached.
    async fn upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()>;

    /// Lists all keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Builds the archive key of a recording.
pub fn archive_key(customer: &str, date: &str, i_xdr: i64) -> String {
    format!("{}/recording_{}.wav", archive_prefix(customer, date), i_xdr)
}

/// The common prefix of all recordings of a customer on a given day.
pub fn archive_prefix(customer: &str, date: &str) -> String {
    format!("{}/{}", customer, date)
}

/// Extracts the record id from an archive key, if it follows the layout.
pub fn parse_record_id(key: &str) -> Option<i64> {
    key.rsplit('/')
        .next()?
        .strip_prefix("recording_")?
        .strip_suffix(".wav")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_layout() {
        assert_eq!(
            archive_key("4821", "2024-03-01", 555),
            "4821/2024-03-01/recording_555.wav"
        );
    }

    #[test]
    fn record_ids_are_recovered_from_keys() {
        assert_eq!(
            parse_record_id("4821/2024-03-01/recording_555.wav"),
            Some(555)
        );
        assert_eq!(parse_record_id("4821/2024-03-01/notes.txt"), None);
        assert_eq!(parse_record_id("4821/2024-03-01/recording_x.wav"), None);
    }
}
