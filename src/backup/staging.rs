//! Local spool directory holding recordings between download and upload.

use crate::errors::ResultExt;
use anyhow::Context;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the staging directory unless it exists.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create staging directory '{}'",
                    self.dir.display()
                )
            })
            .mark_storage()
    }

    /// Location of the staged recording of a record.
    ///
    /// Names embed the customer so that records processed side by side never share a file.
    pub fn path_for(&self, customer: &str, i_xdr: i64) -> PathBuf {
        let customer: String = customer
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        self.dir.join(format!("{}_{}.wav", customer, i_xdr))
    }

    /// Writes the recording to its staging file, replacing leftovers of earlier runs.
    pub async fn stage(&self, customer: &str, i_xdr: i64, audio: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.path_for(customer, i_xdr);

        tokio::fs::write(&path, audio)
            .await
            .with_context(|| format!("Failed to stage recording to '{}'", path.display()))
            .mark_storage()?;

        Ok(path)
    }

    pub async fn discard(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to remove staged file '{}'", path.display()))
            .mark_storage()
    }

    /// Lists the files currently staged, e.g. leftovers of failed uploads.
    pub async fn staged_files(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to list '{}'", self.dir.display()))
                    .mark_storage();
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list '{}'", self.dir.display()))
            .mark_storage()?
        {
            files.push(entry.path());
        }
        files.sort();

        Ok(files)
    }
}
