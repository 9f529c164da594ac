//! Connected storage registry for one CLI invocation

use std::sync::Arc;

use blobq_core::{
    Alias, Bucket, Credentials, Defaults, Result, StorageRegistry, StoreConnector,
};
use blobq_s3::S3Connector;

/// Worker threads started per bucket queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCounts {
    pub upload: usize,
    pub download: usize,
}

impl ThreadCounts {
    /// Command-line values win over the configured defaults
    pub fn resolve(upload: Option<usize>, download: Option<usize>, defaults: &Defaults) -> Self {
        Self {
            upload: upload.unwrap_or(defaults.upload_threads),
            download: download.unwrap_or(defaults.download_threads),
        }
    }
}

/// A registry connected to one endpoint
pub struct Session {
    registry: StorageRegistry,
    threads: ThreadCounts,
}

impl Session {
    /// Connect to the endpoint of `alias` over S3
    pub fn open(alias: &Alias, threads: ThreadCounts) -> Result<Self> {
        Self::with_connector(S3Connector::new()?, alias.credentials(), threads)
    }

    /// Connect with any store connector
    pub fn with_connector<C: StoreConnector + 'static>(
        connector: C,
        credentials: Credentials,
        threads: ThreadCounts,
    ) -> Result<Self> {
        let registry = StorageRegistry::new(connector);
        registry.set_credentials(credentials);
        registry.init()?;
        Ok(Self { registry, threads })
    }

    /// Bucket with its upload queue started
    pub fn upload_bucket(&self, name: &str) -> Result<Arc<Bucket>> {
        let bucket = self.registry.get_or_create_bucket(name);
        if !bucket.upload_queue().is_alive() {
            bucket.set_upload_thread_count(self.threads.upload)?;
        }
        Ok(bucket)
    }

    /// Bucket with its download queue started
    pub fn download_bucket(&self, name: &str) -> Result<Arc<Bucket>> {
        let bucket = self.registry.get_or_create_bucket(name);
        if !bucket.download_queue().is_alive() {
            bucket.set_download_thread_count(self.threads.download)?;
        }
        Ok(bucket)
    }

    /// Bucket for synchronous queries only; no workers are started
    pub fn bucket_for_listing(&self, name: &str) -> Arc<Bucket> {
        self.registry.get_or_create_bucket(name)
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobq_core::{Error, MemoryConnector};

    const THREADS: ThreadCounts = ThreadCounts {
        upload: 2,
        download: 1,
    };

    #[test]
    fn test_resolve_thread_counts() {
        let defaults = Defaults::default();
        assert_eq!(
            ThreadCounts::resolve(Some(8), None, &defaults),
            ThreadCounts {
                upload: 8,
                download: 3
            }
        );
    }

    fn session() -> Session {
        Session::with_connector(MemoryConnector::new(), Credentials::new("ak", "sk"), THREADS)
            .unwrap()
    }

    #[test]
    fn test_upload_bucket_starts_only_upload_queue() {
        let session = session();

        let first = session.upload_bucket("b").unwrap();
        let second = session.upload_bucket("b").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.upload_queue().thread_count(), 2);
        assert!(!first.download_queue().is_alive());
        assert_eq!(first.download_queue().thread_count(), 0);
        assert!(!session.bucket_for_listing("c").upload_queue().is_alive());
    }

    #[test]
    fn test_download_bucket_starts_only_download_queue() {
        let session = session();

        let bucket = session.download_bucket("b").unwrap();
        assert_eq!(bucket.download_queue().thread_count(), 1);
        assert!(!bucket.upload_queue().is_alive());

        // A later upload on the same bucket starts the other direction
        let same = session.upload_bucket("b").unwrap();
        assert!(Arc::ptr_eq(&bucket, &same));
        assert_eq!(same.upload_queue().thread_count(), 2);
        assert_eq!(same.download_queue().thread_count(), 1);
    }

    #[test]
    fn test_connect_failure_is_reported() {
        let result =
            Session::with_connector(MemoryConnector::new(), Credentials::new("", "sk"), THREADS);
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
