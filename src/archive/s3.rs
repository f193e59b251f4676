use crate::archive::ArchiveStore;
use crate::config::ArchiveSettings;
use crate::errors::ResultExt;
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, config};
use bytes::Buf;
use bytesize::{KB, MB};
use futures_util::TryStreamExt;
use std::path::Path;
use tokio_util::io::ReaderStream;

/// Files larger than this are sent as multipart uploads.
const SINGLE_UPLOAD_LIMIT: u64 = 16 * MB;
const MULTIPART_UPLOAD_IDEAL_PART_SIZE: usize = 16 * MB as usize;
const MULTIPART_UPLOAD_BUFFER_SIZE: usize = MULTIPART_UPLOAD_IDEAL_PART_SIZE + (16 * KB as usize);

#[derive(Clone, Debug)]
pub struct S3ArchiveStore {
    pub client: Client,
    bucket: String,
}

impl S3ArchiveStore {
    pub fn new(config: &aws_config::SdkConfig, settings: &ArchiveSettings) -> S3ArchiveStore {
        tracing::info!("Setting up S3 archive in bucket '{}'...", settings.bucket);

        let mut s3_config = config::Builder::from(config).force_path_style(true);
        if let Some(endpoint) = &settings.endpoint_url {
            tracing::info!("Using S3 endpoint {}", endpoint);
            s3_config = s3_config.endpoint_url(endpoint);
        }

        S3ArchiveStore {
            client: Client::from_conf(s3_config.build()),
            bucket: settings.bucket.clone(),
        }
    }

    /// Fails if the configured bucket does not exist or cannot be accessed.
    #[tracing::instrument(skip(self), fields(bucket = self.bucket.as_str()), err(Display))]
    pub async fn verify_bucket(&self) -> anyhow::Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false) =>
            {
                anyhow::bail!("Bucket '{}' does not exist", self.bucket)
            }
            Err(e) => Err(e).context(format!("Cannot access bucket '{}'", self.bucket)),
        }
    }

    async fn put_object(&self, local_path: &Path, key: &str) -> anyhow::Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("Failed to open '{}'", local_path.display()))
            .mark_storage()?;

        let _ = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to store '{}' in bucket '{}'", key, self.bucket))
            .mark_transport()?;

        Ok(())
    }

    async fn multipart_upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(local_path)
            .await
            .with_context(|| format!("Failed to open '{}'", local_path.display()))
            .mark_storage()?;

        let upload_id = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to create multipart upload for '{}' in bucket '{}'",
                    key, self.bucket
                )
            })
            .mark_transport()?
            .upload_id()
            .with_context(|| {
                format!(
                    "Failed to receive upload id for a multipart upload of '{}' in bucket '{}'",
                    key, self.bucket
                )
            })
            .mark_transport()?
            .to_owned();

        let stream: crate::tools::PinnedBytesStream = Box::pin(ReaderStream::new(file));
        if let Err(err) = self
            .perform_multipart_upload(key, &upload_id, stream)
            .await
        {
            if let Err(abort_error) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
            {
                tracing::error!(
                    "Failed to abort multipart upload of '{}' in bucket '{}': {:#}",
                    key,
                    self.bucket,
                    abort_error
                );
            }

            Err(err)
        } else {
            Ok(())
        }
    }

    async fn perform_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        mut stream: crate::tools::PinnedBytesStream,
    ) -> anyhow::Result<()> {
        let mut buffer = Vec::with_capacity(MULTIPART_UPLOAD_BUFFER_SIZE);
        let mut part_number = 1;
        let mut uploaded_parts = Vec::new();

        loop {
            let chunk = stream
                .try_next()
                .await
                .context("Failed to read the staged file")
                .mark_storage()?;
            let finished = chunk.is_none();
            if let Some(chunk) = chunk {
                buffer.extend_from_slice(chunk.chunk());
            }

            let part_complete = buffer.len() >= MULTIPART_UPLOAD_IDEAL_PART_SIZE;
            if part_complete || (finished && !buffer.is_empty()) {
                uploaded_parts.push(
                    self.upload_part(key, upload_id, part_number, std::mem::take(&mut buffer))
                        .await?,
                );
                part_number += 1;
            }

            if finished {
                break;
            }
        }

        let _ = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(uploaded_parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to complete multipart upload of '{}' in bucket '{}'",
                    key, self.bucket,
                )
            })
            .mark_transport()?;

        Ok(())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> anyhow::Result<CompletedPart> {
        let upload_result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload part {} of a multipart upload of '{}' in bucket '{}'",
                    part_number, key, self.bucket,
                )
            })
            .mark_transport()?;

        Ok(CompletedPart::builder()
            .e_tag(upload_result.e_tag.unwrap_or_default())
            .part_number(part_number)
            .build())
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()> {
        let size = tokio::fs::metadata(local_path)
            .await
            .with_context(|| format!("Cannot access staged file '{}'", local_path.display()))
            .mark_storage()?
            .len();

        if size <= SINGLE_UPLOAD_LIMIT {
            self.put_object(local_path, key).await
        } else {
            tracing::debug!(key, size, "Using multipart upload");
            self.multipart_upload(local_path, key).await
        }
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let result = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .with_context(|| {
                    format!("Failed to list '{}' in bucket '{}'", prefix, self.bucket)
                })
                .mark_transport()?;

            keys.extend(
                result
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(str::to_owned),
            );

            match result.next_continuation_token() {
                Some(next) if result.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(next.to_owned())
                }
                _ => return Ok(keys),
            }
        }
    }
}
