//! S3 store implementation
//!
//! Wraps aws-sdk-s3 behind the blocking `BlobStore` interface of
//! blobq-core. Every SDK call is driven to completion on the connector's
//! runtime from the calling queue worker.

use std::io::{self, Read, Write};
use std::sync::Arc;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use aws_sdk_s3::Client;
use bytes::{Buf, Bytes};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use blobq_core::{
    BlobInfo, BlobReader, BlobStore, BlobWriter, Credentials, Error, Result, StoreConnector,
    WriteOptions,
};

use crate::multipart::{MultipartConfig, MultipartUpload, MAX_PARTS};
use crate::runtime::build_runtime;

/// Translate an SDK failure into the blobq error it stands for
pub(crate) fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, bucket: &str, key: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    let status = err.raw_response().map(|r| r.status().as_u16());
    let target = format!("{bucket}/{key}");

    match (code.as_deref(), status) {
        (Some("NoSuchKey" | "NotFound" | "NoSuchBucket"), _) | (_, Some(404)) => {
            Error::NotFound(target)
        }
        (Some("PreconditionFailed" | "ConditionalRequestConflict"), _)
        | (_, Some(409 | 412)) => Error::PreconditionFailed(target),
        (
            Some(
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken",
            ),
            _,
        )
        | (_, Some(401 | 403)) => Error::Auth(format!("{target}: {}", DisplayErrorContext(&err))),
        _ => Error::Network(DisplayErrorContext(&err).to_string()),
    }
}

fn timestamp(value: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<jiff::Timestamp> {
    value.and_then(|t| jiff::Timestamp::from_second(t.secs()).ok())
}

/// Builds [`S3Store`] clients sharing one runtime
#[derive(Debug, Clone)]
pub struct S3Connector {
    runtime: Arc<Runtime>,
    multipart: MultipartConfig,
}

impl S3Connector {
    /// Create a connector with its own runtime
    pub fn new() -> Result<Self> {
        Ok(Self {
            runtime: build_runtime()?,
            multipart: MultipartConfig::default(),
        })
    }

    /// Build a concrete store from `credentials`
    pub fn build_store(&self, credentials: &Credentials) -> Result<S3Store> {
        if let Some(endpoint) = &credentials.endpoint {
            url::Url::parse(endpoint).map_err(Error::connection)?;
        }
        if credentials.access_key.is_empty() || credentials.secret_key.is_empty() {
            return Err(Error::connection("access key and secret key are required"));
        }

        let client = self.runtime.block_on(build_client(credentials));
        info!(
            endpoint = credentials.endpoint.as_deref().unwrap_or("aws"),
            region = %credentials.region,
            path_style = credentials.path_style,
            "S3 client built"
        );

        Ok(S3Store {
            client,
            runtime: Arc::clone(&self.runtime),
            multipart: self.multipart,
        })
    }
}

impl StoreConnector for S3Connector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn BlobStore>> {
        Ok(Arc::new(self.build_store(credentials)?))
    }
}

async fn build_client(credentials: &Credentials) -> Client {
    let provider = aws_credential_types::Credentials::new(
        &credentials.access_key,
        &credentials.secret_key,
        credentials.session_token.clone(),
        None,
        "blobq-static-credentials",
    );

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .credentials_provider(provider)
        .region(aws_config::Region::new(credentials.region.clone()));
    if let Some(endpoint) = &credentials.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        .force_path_style(credentials.path_style)
        .build();
    Client::from_conf(s3_config)
}

/// Blocking S3 client
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    runtime: Arc<Runtime>,
    multipart: MultipartConfig,
}

impl S3Store {
    /// The underlying SDK client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn head_etag(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(response) => Ok(Some(
                response.e_tag().unwrap_or_default().trim_matches('"').to_string(),
            )),
            Err(e) => match map_sdk_error(e, bucket, key) {
                Error::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    /// Fail early on preconditions a HEAD request can already decide; the
    /// commit request carries them again
    async fn check_preconditions(&self, bucket: &str, key: &str, options: &WriteOptions) -> Result<()> {
        if !options.requires_absent() && options.required_etag().is_none() {
            return Ok(());
        }

        let current = self.head_etag(bucket, key).await?;
        let target = format!("{bucket}/{key}");
        match (current, options.required_etag()) {
            (Some(_), _) if options.requires_absent() => Err(Error::PreconditionFailed(format!(
                "{target} already exists"
            ))),
            (None, Some(_)) => Err(Error::NotFound(target)),
            (Some(etag), Some(expected)) if etag != expected.trim_matches('"') => Err(
                Error::PreconditionFailed(format!("{target} has etag {etag}, expected {expected}")),
            ),
            _ => Ok(()),
        }
    }
}

impl BlobStore for S3Store {
    fn open_write(
        &self,
        bucket: &str,
        path: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn BlobWriter>> {
        self.runtime
            .block_on(self.check_preconditions(bucket, path, options))?;

        Ok(Box::new(S3Writer {
            client: self.client.clone(),
            runtime: Arc::clone(&self.runtime),
            bucket: bucket.to_string(),
            key: path.to_string(),
            options: options.clone(),
            part_size: self.multipart.part_size as usize,
            buffer: Vec::new(),
            bytes_written: 0,
            multipart: None,
        }))
    }

    fn open_read(&self, bucket: &str, path: &str) -> Result<Box<dyn BlobReader>> {
        let response = self
            .runtime
            .block_on(self.client.get_object().bucket(bucket).key(path).send())
            .map_err(|e| map_sdk_error(e, bucket, path))?;

        let mut info = BlobInfo::new(path, response.content_length().unwrap_or(0).max(0) as u64);
        info.content_type = response.content_type().map(str::to_string);
        info.etag = response.e_tag().map(|e| e.trim_matches('"').to_string());
        info.last_modified = timestamp(response.last_modified());

        Ok(Box::new(S3Reader::new(
            Arc::clone(&self.runtime),
            response.body,
            info,
        )))
    }

    fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.runtime.block_on(async {
            let mut keys = Vec::new();
            let mut continuation: Option<String> = None;
            loop {
                let response = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_continuation_token(continuation.take())
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, bucket, prefix))?;

                keys.extend(
                    response
                        .contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_string)),
                );

                match response.next_continuation_token() {
                    Some(token) if response.is_truncated().unwrap_or(false) => {
                        continuation = Some(token.to_string());
                    }
                    _ => break,
                }
            }
            keys.sort();
            debug!(bucket, prefix, count = keys.len(), "Listed blobs");
            Ok(keys)
        })
    }
}

/// Upload stream: buffers one part, then switches to a multipart upload
pub struct S3Writer {
    client: Client,
    runtime: Arc<Runtime>,
    bucket: String,
    key: String,
    options: WriteOptions,
    part_size: usize,
    buffer: Vec<u8>,
    bytes_written: u64,
    multipart: Option<MultipartUpload>,
}

impl S3Writer {
    /// Ship every full part sitting in the buffer
    fn flush_parts(&mut self) -> Result<()> {
        while self.buffer.len() >= self.part_size {
            let rest = self.buffer.split_off(self.part_size);
            let part = std::mem::replace(&mut self.buffer, rest);
            self.send_part(part)?;
        }
        Ok(())
    }

    fn send_part(&mut self, part: Vec<u8>) -> Result<()> {
        if self
            .multipart
            .as_ref()
            .is_some_and(|upload| upload.part_count() >= MAX_PARTS)
        {
            return Err(Error::Network(format!(
                "{}/{} exceeds {MAX_PARTS} parts",
                self.bucket, self.key
            )));
        }

        let client = &self.client;
        let (bucket, key, options) = (&self.bucket, &self.key, &self.options);
        let multipart = &mut self.multipart;
        self.runtime.block_on(async {
            if multipart.is_none() {
                *multipart = Some(MultipartUpload::start(client, bucket, key, options).await?);
            }
            match multipart.as_mut() {
                Some(upload) => upload.upload_part(client, part).await,
                None => Ok(()),
            }
        })
    }

    async fn put_single(&self, data: Vec<u8>) -> Result<Option<String>> {
        let options = &self.options;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(data));
        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        if let Some(class) = options.storage_class() {
            request = request.storage_class(StorageClass::from(class));
        }
        for (name, value) in options.metadata() {
            request = request.metadata(name, value);
        }
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
}

impl Write for S3Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.bytes_written += buf.len() as u64;
        self.flush_parts()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlobWriter for S3Writer {
    fn close(mut self: Box<Self>) -> Result<BlobInfo> {
        let data = std::mem::take(&mut self.buffer);
        let etag = match self.multipart.take() {
            None => self.runtime.block_on(self.put_single(data))?,
            Some(mut upload) => {
                let (client, options) = (&self.client, &self.options);
                let completed = self.runtime.block_on(async {
                    if !data.is_empty() {
                        upload.upload_part(client, data).await?;
                    }
                    upload.complete(client, options).await
                });
                if completed.is_err() {
                    // A failed commit leaves no parts behind
                    if let Err(e) = self.runtime.block_on(upload.abort(client)) {
                        warn!(error = %e, "Failed to abort multipart upload");
                    }
                }
                completed?
            }
        };

        let mut info = BlobInfo::new(&self.key, self.bytes_written);
        info.content_type = self.options.content_type.clone();
        info.etag = etag.map(|e| e.trim_matches('"').to_string());
        info.last_modified = Some(jiff::Timestamp::now());
        debug!(bucket = %self.bucket, key = %self.key, size = self.bytes_written, "Blob committed");
        Ok(info)
    }

    fn abort(mut self: Box<Self>) -> Result<()> {
        if let Some(upload) = self.multipart.take() {
            self.runtime.block_on(upload.abort(&self.client))?;
        }
        Ok(())
    }
}

impl Drop for S3Writer {
    fn drop(&mut self) {
        if let Some(upload) = self.multipart.take() {
            warn!(bucket = %self.bucket, key = %self.key, "Upload stream dropped unfinished");
            if let Err(e) = self.runtime.block_on(upload.abort(&self.client)) {
                warn!(error = %e, "Failed to abort multipart upload");
            }
        }
    }
}

/// Download stream over a `GetObject` body
pub struct S3Reader {
    runtime: Arc<Runtime>,
    body: ByteStream,
    chunk: Bytes,
    info: BlobInfo,
}

impl S3Reader {
    pub(crate) fn new(runtime: Arc<Runtime>, body: ByteStream, info: BlobInfo) -> Self {
        Self {
            runtime,
            body,
            chunk: Bytes::new(),
            info,
        }
    }
}

impl Read for S3Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.chunk.is_empty() {
            match self.runtime.block_on(self.body.next()) {
                Some(Ok(bytes)) => self.chunk = bytes,
                Some(Err(e)) => return Err(io::Error::other(e)),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }
}

impl BlobReader for S3Reader {
    fn info(&self) -> &BlobInfo {
        &self.info
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_bad_endpoint() {
        let connector = S3Connector::new().unwrap();
        let creds = Credentials::new("ak", "sk").endpoint("not a url");
        assert!(matches!(
            connector.connect(&creds),
            Err(Error::Connection { .. })
        ));
    }

    #[test]
    fn test_connect_rejects_missing_keys() {
        let connector = S3Connector::new().unwrap();
        let creds = Credentials::new("", "sk").endpoint("http://localhost:9000");
        let err = connector.connect(&creds).err().unwrap();
        assert!(err.to_string().contains("access key and secret key"));
    }

    #[test]
    fn test_connect_builds_client_offline() {
        let connector = S3Connector::new().unwrap();
        let creds = Credentials::new("ak", "sk")
            .endpoint("http://127.0.0.1:9")
            .path_style(true);
        assert!(connector.connect(&creds).is_ok());
    }

    #[test]
    fn test_reader_spans_chunks() {
        let runtime = build_runtime().unwrap();
        let body = ByteStream::from(b"hello, blob world".to_vec());
        let mut reader = S3Reader::new(runtime, body, BlobInfo::new("k", 17));

        let mut first = [0u8; 5];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"hello");

        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, ", blob world");
        assert_eq!(reader.read(&mut first).unwrap(), 0);
        assert_eq!(reader.info().size_bytes, 17);
    }
}
