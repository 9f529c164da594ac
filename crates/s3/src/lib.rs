//! blobq-s3: S3 backend for blobq
//!
//! Implements the blocking `BlobStore` interface of blobq-core with
//! aws-sdk-s3. This is the only crate that depends on the AWS SDK.

pub mod client;
pub mod multipart;
mod runtime;

pub use client::{S3Connector, S3Reader, S3Store, S3Writer};
pub use multipart::MultipartConfig;
