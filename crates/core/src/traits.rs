//! Remote store interface
//!
//! These traits are what the transaction machinery calls to reach a remote
//! object store. They are blocking: every call runs on a queue worker thread.
//! The S3 adapter lives in blobq-s3; an in-memory store lives in
//! [`crate::memory`].

use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata for a stored blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Path relative to the bucket
    pub path: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// Human-readable size
    pub size_human: String,

    /// Content type, when the store recorded one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Entity tag of the stored version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,
}

impl BlobInfo {
    /// Create a new BlobInfo for a blob of `size` bytes
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes: size,
            size_human: humansize::format_size(size, humansize::BINARY),
            content_type: None,
            etag: None,
            last_modified: None,
        }
    }
}

/// Store-specific write precondition or attribute, applied when the write
/// stream is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOption {
    /// Fail unless no blob exists at the target path
    DoesNotExist,

    /// Fail unless the current blob has this entity tag
    IfMatch(String),

    /// Storage class for the new blob
    StorageClass(String),

    /// User metadata entry
    Metadata { key: String, value: String },
}

/// Everything a store needs to open a write stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Content type recorded with the blob
    pub content_type: Option<String>,

    /// Preconditions and attributes, in the order they were added
    pub target_options: Vec<TargetOption>,
}

impl WriteOptions {
    /// Whether the write must not replace an existing blob
    pub fn requires_absent(&self) -> bool {
        self.target_options
            .iter()
            .any(|o| matches!(o, TargetOption::DoesNotExist))
    }

    /// Entity tag the existing blob must carry, if any
    pub fn required_etag(&self) -> Option<&str> {
        self.target_options.iter().find_map(|o| match o {
            TargetOption::IfMatch(etag) => Some(etag.as_str()),
            _ => None,
        })
    }

    /// Requested storage class, if any
    pub fn storage_class(&self) -> Option<&str> {
        self.target_options.iter().find_map(|o| match o {
            TargetOption::StorageClass(class) => Some(class.as_str()),
            _ => None,
        })
    }

    /// User metadata entries, in insertion order
    pub fn metadata(&self) -> impl Iterator<Item = (&str, &str)> {
        self.target_options.iter().filter_map(|o| match o {
            TargetOption::Metadata { key, value } => Some((key.as_str(), value.as_str())),
            _ => None,
        })
    }
}

/// Write side of a transfer stream handle
///
/// Bytes written are only durable after [`BlobWriter::close`] returns `Ok`.
pub trait BlobWriter: Write + Send {
    /// Commit the written bytes and release the handle
    fn close(self: Box<Self>) -> Result<BlobInfo>;

    /// Release the handle without committing anything
    fn abort(self: Box<Self>) -> Result<()>;
}

/// Read side of a transfer stream handle
pub trait BlobReader: Read + Send {
    /// Metadata of the blob being read
    fn info(&self) -> &BlobInfo;

    /// Release the handle
    fn close(self: Box<Self>) -> Result<()>;
}

/// Remote object store client
///
/// Implementations are shared read-only by every worker of every bucket.
#[cfg_attr(test, mockall::automock)]
pub trait BlobStore: Send + Sync {
    /// Open a write stream for `path` in `bucket`
    fn open_write(
        &self,
        bucket: &str,
        path: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn BlobWriter>>;

    /// Open a read stream for `path` in `bucket`
    fn open_read(&self, bucket: &str, path: &str) -> Result<Box<dyn BlobReader>>;

    /// List blob paths under `prefix`, sorted
    fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Credentials used to build a store client
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Endpoint URL; `None` selects the provider default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Session token for temporary credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Region
    pub region: String,

    /// Use path-style bucket addressing
    #[serde(default)]
    pub path_style: bool,
}

impl Credentials {
    /// Create credentials for the given key pair in the default region
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: None,
            region: "us-east-1".to_string(),
            path_style: false,
        }
    }

    /// Set the endpoint URL
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Select path-style addressing
    pub fn path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("path_style", &self.path_style)
            .finish()
    }
}

/// Builds a store client from credentials
pub trait StoreConnector: Send + Sync {
    /// Build a client; failures are reported as [`crate::Error::Connection`]
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn BlobStore>>;
}
