//! Per-bucket upload and download queues

use std::sync::Arc;

use tracing::info;

use crate::client::SharedClient;
use crate::error::{Error, Result};
use crate::queue::WorkerPool;
use crate::transaction::{DownloadJob, DownloadTransaction, UploadJob, UploadTransaction};

/// One remote bucket and the two queues that serve it
///
/// Both queues exist from construction but reject work until their thread
/// count is set.
#[derive(Debug)]
pub struct Bucket {
    name: String,
    upload_queue: Arc<WorkerPool<UploadJob>>,
    download_queue: Arc<WorkerPool<DownloadJob>>,
    client: SharedClient,
}

impl Bucket {
    /// Create a bucket whose transactions use `client`
    pub fn new(name: impl Into<String>, client: SharedClient) -> Self {
        Self {
            name: name.into(),
            upload_queue: Arc::new(WorkerPool::new()),
            download_queue: Arc::new(WorkerPool::new()),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start `count` upload workers labelled `bucket-upload-{name}`
    pub fn set_upload_thread_count(&self, count: usize) -> Result<&Self> {
        self.upload_queue
            .create_threads(&format!("bucket-upload-{}", self.name), count)?;
        Ok(self)
    }

    /// Start `count` download workers labelled `bucket-download-{name}`
    pub fn set_download_thread_count(&self, count: usize) -> Result<&Self> {
        self.download_queue
            .create_threads(&format!("bucket-download-{}", self.name), count)?;
        Ok(self)
    }

    /// Start a new upload to `path`
    pub fn create_upload_transaction(&self, path: impl Into<String>) -> UploadTransaction {
        UploadTransaction::new(
            &self.name,
            path.into(),
            Arc::clone(&self.upload_queue),
            self.client.clone(),
        )
    }

    /// Start a new download of `path`
    pub fn create_download_transaction(&self, path: impl Into<String>) -> DownloadTransaction {
        DownloadTransaction::new(
            &self.name,
            path.into(),
            Arc::clone(&self.download_queue),
            self.client.clone(),
        )
    }

    /// List blob paths under `prefix`, directly on the calling thread
    pub fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        let store = self.client.current().ok_or(Error::NotConnected)?;
        store.list_blobs(&self.name, prefix)
    }

    pub fn upload_queue(&self) -> &WorkerPool<UploadJob> {
        &self.upload_queue
    }

    pub fn download_queue(&self) -> &WorkerPool<DownloadJob> {
        &self.download_queue
    }

    /// Drain both queues and join their workers
    pub fn shutdown(&self) {
        self.upload_queue.shutdown();
        self.download_queue.shutdown();
        info!(bucket = %self.name, "Bucket queues shut down");
    }

    /// Cancel everything still pending in both queues; returns how many
    /// transactions were cancelled
    pub fn shutdown_now(&self) -> usize {
        let cancelled = self.upload_queue.shutdown_now() + self.download_queue.shutdown_now();
        info!(bucket = %self.name, cancelled, "Bucket queues stopped");
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::transaction::Outcome;
    use crate::traits::MockBlobStore;
    use std::io::Write;
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    #[test]
    fn test_thread_counts_label_queues() {
        let bucket = Bucket::new("photos", SharedClient::new());
        bucket
            .set_upload_thread_count(3)
            .unwrap()
            .set_download_thread_count(2)
            .unwrap();

        assert_eq!(
            bucket.upload_queue().label().as_deref(),
            Some("bucket-upload-photos")
        );
        assert_eq!(
            bucket.download_queue().label().as_deref(),
            Some("bucket-download-photos")
        );
        assert_eq!(bucket.upload_queue().thread_count(), 3);
        assert_eq!(bucket.download_queue().thread_count(), 2);
    }

    #[test]
    fn test_thread_count_set_twice_is_rejected() {
        let bucket = Bucket::new("b", SharedClient::new());
        bucket.set_upload_thread_count(2).unwrap();
        assert!(matches!(
            bucket.set_upload_thread_count(5),
            Err(Error::AlreadyStarted(_))
        ));
        assert_eq!(bucket.upload_queue().thread_count(), 2);
    }

    #[test]
    fn test_upload_without_threads_is_not_queued() {
        let bucket = Bucket::new("b", SharedClient::new());
        let result = bucket
            .create_upload_transaction("test/sample.jpg")
            .execute(|_| Ok(()));
        assert!(matches!(result, Err(Error::NotInitialized(_))));
        assert_eq!(bucket.upload_queue().pending_len(), 0);
    }

    #[test]
    fn test_upload_then_download() {
        let store = MemoryStore::new();
        let bucket = Bucket::new("b", SharedClient::with_store(Arc::new(store.clone())));
        bucket.set_upload_thread_count(1).unwrap();
        bucket.set_download_thread_count(1).unwrap();

        let (done_tx, done) = unbounded();
        bucket
            .create_upload_transaction("a/b.txt")
            .content_type("text/plain")
            .on_complete(move |outcome| done_tx.send(outcome).unwrap())
            .execute(|result| {
                result?.write_all(b"payload")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::Succeeded
        );
        assert_eq!(store.get("b", "a/b.txt").unwrap(), b"payload");
        assert_eq!(bucket.list_blobs("a/").unwrap(), vec!["a/b.txt".to_string()]);
    }

    #[test]
    fn test_list_blobs_uses_shared_client() {
        let mut store = MockBlobStore::new();
        store
            .expect_list_blobs()
            .withf(|bucket, prefix| bucket == "b" && prefix == "logs/")
            .times(1)
            .returning(|_, _| Ok(vec!["logs/1".into(), "logs/2".into()]));

        let bucket = Bucket::new("b", SharedClient::with_store(Arc::new(store)));
        assert_eq!(bucket.list_blobs("logs/").unwrap().len(), 2);

        let disconnected = Bucket::new("b", SharedClient::new());
        assert!(matches!(
            disconnected.list_blobs(""),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_shutdown_drains_uploads() {
        let store = MemoryStore::new();
        let bucket = Bucket::new("b", SharedClient::with_store(Arc::new(store.clone())));
        bucket.set_upload_thread_count(2).unwrap();

        for i in 0..10 {
            bucket
                .create_upload_transaction(format!("k{i}"))
                .execute(move |result| {
                    write!(result?, "{i}")?;
                    Ok(())
                })
                .unwrap();
        }
        bucket.shutdown();

        assert_eq!(store.len(), 10);
        assert!(matches!(
            bucket.create_upload_transaction("late").execute(|_| Ok(())),
            Err(Error::NotInitialized(_))
        ));
    }
}
