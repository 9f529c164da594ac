//! Multipart upload support
//!
//! Upload streams buffer up to one part in memory. Once a stream outgrows a
//! single part it switches to a multipart upload and ships each full part as
//! it fills.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use aws_sdk_s3::Client;
use tracing::debug;

use blobq_core::{Result, WriteOptions};

use crate::client::map_sdk_error;

/// Default part size: 16 MiB
pub const DEFAULT_PART_SIZE: u64 = 16 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: usize = 10_000;

/// Multipart upload configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Part size in bytes
    pub part_size: u64,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// An in-progress multipart upload
#[derive(Debug)]
pub(crate) struct MultipartUpload {
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
}

impl MultipartUpload {
    /// Start an upload carrying the content type, storage class and metadata
    /// of `options`
    pub(crate) async fn start(
        client: &Client,
        bucket: &str,
        key: &str,
        options: &WriteOptions,
    ) -> Result<Self> {
        let mut request = client.create_multipart_upload().bucket(bucket).key(key);
        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        if let Some(class) = options.storage_class() {
            request = request.storage_class(StorageClass::from(class));
        }
        for (name, value) in options.metadata() {
            request = request.metadata(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, bucket, key))?;
        let upload_id = response.upload_id().unwrap_or_default().to_string();
        debug!(bucket, key, upload_id = %upload_id, "Multipart upload started");

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
        })
    }

    pub(crate) fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub(crate) async fn upload_part(&mut self, client: &Client, data: Vec<u8>) -> Result<()> {
        let part_number = self.parts.len() as i32 + 1;
        let size = data.len();
        let response = client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket, &self.key))?;

        debug!(part_number, size, "Uploaded part");
        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(response.e_tag().map(str::to_string))
                .build(),
        );
        Ok(())
    }

    /// Assemble the uploaded parts, honouring the write preconditions
    ///
    /// Returns the entity tag of the new blob.
    pub(crate) async fn complete(
        &self,
        client: &Client,
        options: &WriteOptions,
    ) -> Result<Option<String>> {
        let mut request = client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(self.parts.clone()))
                    .build(),
            );
        if options.requires_absent() {
            request = request.if_none_match("*");
        }
        if let Some(etag) = options.required_etag() {
            request = request.if_match(etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket, &self.key))?;
        Ok(response.e_tag().map(str::to_string))
    }

    pub(crate) async fn abort(self, client: &Client) -> Result<()> {
        client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.bucket, &self.key))?;
        debug!(upload_id = %self.upload_id, "Multipart upload aborted");
        Ok(())
    }
}
