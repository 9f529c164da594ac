//! blobq-core: transaction queues for remote blob storage
//!
//! Uploads and downloads are described as transactions, submitted to a
//! per-bucket, per-direction worker pool and executed against a shared
//! store client. Each transaction reports its result to a listener exactly
//! once, then its completion exactly once.
//!
//! ```no_run
//! use std::io::Write;
//! use blobq_core::{Credentials, MemoryConnector, StorageRegistry};
//!
//! # fn main() -> blobq_core::Result<()> {
//! let registry = StorageRegistry::new(MemoryConnector::new());
//! registry.set_credentials(Credentials::new("access", "secret"));
//! registry.connect()?;
//!
//! let bucket = registry.get_or_create_bucket("photos");
//! bucket.set_upload_thread_count(3)?.set_download_thread_count(3)?;
//!
//! bucket
//!     .create_upload_transaction("2024/cat.jpg")
//!     .content_type("image/jpeg")
//!     .execute(|stream| {
//!         stream?.write_all(b"...")?;
//!         Ok(())
//!     })?;
//! registry.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! The store itself sits behind [`BlobStore`]; blobq-s3 provides the S3
//! implementation and [`memory`] an in-process one.

pub mod alias;
pub mod bucket;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod path;
pub mod queue;
pub mod registry;
pub mod traits;
pub mod transaction;

pub use alias::{Alias, AliasManager};
pub use bucket::Bucket;
pub use client::SharedClient;
pub use config::{Config, ConfigManager, Defaults};
pub use error::{Error, ErrorCategory, Result};
pub use memory::{MemoryConnector, MemoryStore};
pub use path::{parse_path, RemotePath};
pub use queue::{Job, WorkerPool};
pub use registry::StorageRegistry;
pub use traits::{
    BlobInfo, BlobReader, BlobStore, BlobWriter, Credentials, StoreConnector, TargetOption,
    WriteOptions,
};
pub use transaction::{
    CompletionListener, DownloadTransaction, ListenerResult, Outcome, TransactionId,
    UploadTransaction,
};
