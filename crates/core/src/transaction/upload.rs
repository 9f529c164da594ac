//! Upload transactions

use std::fmt;
use std::sync::Arc;

use tracing::{debug, debug_span, warn};

use super::{
    notify_completion, notify_result, CompletionListener, ListenerResult, Outcome, TransactionId,
};
use crate::client::SharedClient;
use crate::error::{Error, Result};
use crate::queue::{Job, WorkerPool};
use crate::traits::{BlobWriter, TargetOption, WriteOptions};

/// Result listener of an upload: receives the write stream or the error
/// that prevented opening it
pub type UploadListener =
    Box<dyn FnOnce(Result<&mut dyn BlobWriter>) -> ListenerResult + Send + 'static>;

/// An upload being configured
///
/// Created by [`crate::Bucket::create_upload_transaction`]. Setters consume
/// and return the builder; [`UploadTransaction::execute`] freezes it.
pub struct UploadTransaction {
    id: TransactionId,
    bucket: String,
    target_path: String,
    content_type: Option<String>,
    target_options: Vec<TargetOption>,
    listener: Option<UploadListener>,
    on_complete: Option<CompletionListener>,
    queue: Arc<WorkerPool<UploadJob>>,
    client: SharedClient,
}

impl UploadTransaction {
    pub(crate) fn new(
        bucket: &str,
        target_path: String,
        queue: Arc<WorkerPool<UploadJob>>,
        client: SharedClient,
    ) -> Self {
        Self {
            id: TransactionId::next(),
            bucket: bucket.to_string(),
            target_path,
            content_type: None,
            target_options: Vec::new(),
            listener: None,
            on_complete: None,
            queue,
            client,
        }
    }

    /// Identifier this transaction will be logged and reported under
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Path of the blob within the bucket
    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    /// Content type recorded with the blob
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add one write precondition or attribute
    pub fn target_option(mut self, option: TargetOption) -> Self {
        self.target_options.push(option);
        self
    }

    /// Add several write preconditions or attributes
    pub fn target_options(mut self, options: impl IntoIterator<Item = TargetOption>) -> Self {
        self.target_options.extend(options);
        self
    }

    /// Set the result listener without submitting
    pub fn on_result<F>(mut self, listener: F) -> Self
    where
        F: FnOnce(Result<&mut dyn BlobWriter>) -> ListenerResult + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Register the completion listener
    pub fn on_complete<F>(mut self, listener: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.on_complete = Some(Box::new(listener));
        self
    }

    /// Set the result listener and submit
    pub fn execute<F>(self, listener: F) -> Result<TransactionId>
    where
        F: FnOnce(Result<&mut dyn BlobWriter>) -> ListenerResult + Send + 'static,
    {
        self.on_result(listener).submit()
    }

    /// Freeze the configuration and enqueue the upload
    ///
    /// Fails without enqueueing when no result listener was set, the path is
    /// empty, or the bucket's upload threads were never created.
    pub fn submit(self) -> Result<TransactionId> {
        let UploadTransaction {
            id,
            bucket,
            target_path,
            content_type,
            target_options,
            listener,
            on_complete,
            queue,
            client,
        } = self;

        let Some(listener) = listener else {
            return Err(Error::ListenerMissing(format!(
                "upload of '{target_path}' needs a result listener"
            )));
        };
        if target_path.is_empty() {
            return Err(Error::InvalidPath("target path cannot be empty".into()));
        }
        if !queue.is_alive() {
            return Err(not_initialized(&bucket));
        }

        let job = UploadJob {
            id,
            bucket,
            target_path,
            options: WriteOptions {
                content_type,
                target_options,
            },
            listener,
            on_complete,
            client,
        };
        debug!(%id, bucket = %job.bucket, path = %job.target_path, "Upload submitted");

        let bucket = job.bucket.clone();
        queue.add_item(job).map_err(|e| match e {
            Error::NotInitialized(_) => not_initialized(&bucket),
            other => other,
        })?;
        Ok(id)
    }
}

fn not_initialized(bucket: &str) -> Error {
    Error::NotInitialized(format!(
        "upload threads of bucket '{bucket}' were never created"
    ))
}

impl fmt::Debug for UploadTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTransaction")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .field("target_path", &self.target_path)
            .field("content_type", &self.content_type)
            .field("target_options", &self.target_options)
            .field("has_listener", &self.listener.is_some())
            .field("has_completion", &self.on_complete.is_some())
            .finish()
    }
}

/// A submitted upload, owned by the upload queue
pub struct UploadJob {
    id: TransactionId,
    bucket: String,
    target_path: String,
    options: WriteOptions,
    listener: UploadListener,
    on_complete: Option<CompletionListener>,
    client: SharedClient,
}

impl UploadJob {
    /// Transaction identifier
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Path of the blob within the bucket
    pub fn target_path(&self) -> &str {
        &self.target_path
    }
}

impl Job for UploadJob {
    fn run(self) {
        let UploadJob {
            id,
            bucket,
            target_path,
            options,
            listener,
            on_complete,
            client,
        } = self;

        let span = debug_span!("upload", %id, bucket = %bucket, path = %target_path);
        let _guard = span.enter();

        let opened = client
            .current()
            .ok_or(Error::NotConnected)
            .and_then(|store| store.open_write(&bucket, &target_path, &options));

        let outcome = match opened {
            Ok(mut writer) => {
                debug!("Write stream opened");
                if notify_result(id, || listener(Ok(&mut *writer))) {
                    match writer.close() {
                        Ok(info) => {
                            debug!(size = info.size_bytes, "Upload committed");
                            Outcome::Succeeded
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to close upload stream");
                            Outcome::CloseFailed
                        }
                    }
                } else {
                    // A failed listener never publishes a partial blob
                    if let Err(e) = writer.abort() {
                        warn!(error = %e, "Failed to abort upload stream");
                    }
                    Outcome::ListenerFailed
                }
            }
            Err(e) => {
                debug!(error = %e, "Unable to open write stream");
                if notify_result(id, || listener(Err(e))) {
                    Outcome::TransferFailed
                } else {
                    Outcome::ListenerFailed
                }
            }
        };

        notify_completion(id, on_complete, outcome);
    }

    fn cancel(self, reason: Error) {
        let UploadJob {
            id,
            listener,
            on_complete,
            ..
        } = self;
        notify_result(id, || listener(Err(reason)));
        notify_completion(id, on_complete, Outcome::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::traits::{BlobInfo, MockBlobStore};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};

    fn started_queue() -> Arc<WorkerPool<UploadJob>> {
        let queue = Arc::new(WorkerPool::new());
        queue.create_threads("bucket-upload-test", 2).unwrap();
        queue
    }

    fn completion_channel() -> (
        impl FnOnce(Outcome) + Send + 'static,
        Receiver<Outcome>,
    ) {
        let (tx, rx) = unbounded();
        (move |outcome| tx.send(outcome).unwrap(), rx)
    }

    /// Writer counting how it was released
    struct CountingWriter {
        closes: Arc<AtomicUsize>,
        aborts: Arc<AtomicUsize>,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl BlobWriter for CountingWriter {
        fn close(self: Box<Self>) -> Result<BlobInfo> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(BlobInfo::new("counted", 0))
        }
        fn abort(self: Box<Self>) -> Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_missing_listener_is_rejected() {
        let queue = started_queue();
        let tx = UploadTransaction::new("b", "x".into(), Arc::clone(&queue), SharedClient::new());

        let result = tx.content_type("text/plain").submit();
        assert!(matches!(result, Err(Error::ListenerMissing(_))));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_queue_without_threads_is_rejected() {
        let queue = Arc::new(WorkerPool::new());
        let tx = UploadTransaction::new("b", "x".into(), Arc::clone(&queue), SharedClient::new());

        let result = tx.execute(|_| Ok(()));
        assert!(matches!(result, Err(Error::NotInitialized(msg)) if msg.contains("'b'")));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let queue = started_queue();
        let tx = UploadTransaction::new("b", String::new(), queue, SharedClient::new());
        assert!(matches!(tx.execute(|_| Ok(())), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_options_are_passed_at_open() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_mock = Arc::clone(&seen);

        let mut store = MockBlobStore::new();
        store
            .expect_open_write()
            .times(1)
            .returning(move |bucket, path, options| {
                *seen_in_mock.lock().unwrap() =
                    Some((bucket.to_string(), path.to_string(), options.clone()));
                Ok(Box::new(CountingWriter {
                    closes: Arc::new(AtomicUsize::new(0)),
                    aborts: Arc::new(AtomicUsize::new(0)),
                }))
            });

        let (on_complete, done) = completion_channel();
        UploadTransaction::new(
            "b",
            "test/sample.jpg".into(),
            started_queue(),
            SharedClient::with_store(Arc::new(store)),
        )
        .content_type("image/jpg")
        .target_option(TargetOption::DoesNotExist)
        .on_complete(on_complete)
        .execute(|_| Ok(()))
        .unwrap();

        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::Succeeded
        );
        let (bucket, path, options) = seen.lock().unwrap().take().unwrap();
        assert_eq!(bucket, "b");
        assert_eq!(path, "test/sample.jpg");
        assert_eq!(options.content_type.as_deref(), Some("image/jpg"));
        assert_eq!(options.target_options, vec![TargetOption::DoesNotExist]);
    }

    #[test]
    fn test_open_failure_reaches_listener_once() {
        let mut store = MockBlobStore::new();
        store
            .expect_open_write()
            .returning(|_, _, _| Err(Error::Network("connection reset".into())));

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let (on_complete, done) = completion_channel();

        UploadTransaction::new(
            "b",
            "x".into(),
            started_queue(),
            SharedClient::with_store(Arc::new(store)),
        )
        .on_complete(on_complete)
        .execute(move |result| {
            counted.fetch_add(1, Ordering::SeqCst);
            assert!(matches!(result, Err(Error::Network(_))));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::TransferFailed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_not_connected_reaches_listener() {
        let (on_complete, done) = completion_channel();
        let (errors_tx, errors) = unbounded();

        UploadTransaction::new("b", "x".into(), started_queue(), SharedClient::new())
            .on_complete(on_complete)
            .execute(move |result| {
                errors_tx.send(result.err().map(|e| e.to_string())).unwrap();
                Ok(())
            })
            .unwrap();

        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::TransferFailed
        );
        assert_eq!(
            errors.recv().unwrap().as_deref(),
            Some("Storage client not connected")
        );
    }

    #[test]
    fn test_failing_listener_aborts_and_completes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        let (c, a) = (Arc::clone(&closes), Arc::clone(&aborts));

        let mut store = MockBlobStore::new();
        store.expect_open_write().returning(move |_, _, _| {
            Ok(Box::new(CountingWriter {
                closes: Arc::clone(&c),
                aborts: Arc::clone(&a),
            }))
        });

        let queue = started_queue();
        let client = SharedClient::with_store(Arc::new(store));

        let (on_complete, done) = completion_channel();
        UploadTransaction::new("b", "err".into(), Arc::clone(&queue), client.clone())
            .on_complete(on_complete)
            .execute(|result| {
                let stream = result?;
                stream.write_all(b"partial")?;
                anyhow::bail!("source file vanished")
            })
            .unwrap();
        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::ListenerFailed
        );

        let (on_complete, done) = completion_channel();
        UploadTransaction::new("b", "panic".into(), Arc::clone(&queue), client.clone())
            .on_complete(on_complete)
            .execute(|_| panic!("listener bug"))
            .unwrap();
        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::ListenerFailed
        );

        // Workers are still serving after both failures
        let (on_complete, done) = completion_channel();
        UploadTransaction::new("b", "ok".into(), queue, client)
            .on_complete(on_complete)
            .execute(|_| Ok(()))
            .unwrap();
        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::Succeeded
        );

        assert_eq!(aborts.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_failure_is_reported_to_completion() {
        struct FailingClose;
        impl Write for FailingClose {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        impl BlobWriter for FailingClose {
            fn close(self: Box<Self>) -> Result<BlobInfo> {
                Err(Error::Network("commit rejected".into()))
            }
            fn abort(self: Box<Self>) -> Result<()> {
                Ok(())
            }
        }

        let mut store = MockBlobStore::new();
        store
            .expect_open_write()
            .returning(|_, _, _| Ok(Box::new(FailingClose)));

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let (on_complete, done) = completion_channel();
        UploadTransaction::new(
            "b",
            "x".into(),
            started_queue(),
            SharedClient::with_store(Arc::new(store)),
        )
        .on_complete(on_complete)
        .execute(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)).unwrap(),
            Outcome::CloseFailed
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_delivers_error_then_completion() {
        let store = MemoryStore::new();
        let (errors_tx, errors) = unbounded();
        let (on_complete, done) = completion_channel();

        let job = UploadJob {
            id: TransactionId::next(),
            bucket: "b".into(),
            target_path: "x".into(),
            options: WriteOptions::default(),
            listener: Box::new(move |result| {
                errors_tx.send(matches!(result, Err(Error::Cancelled(_)))).unwrap();
                Ok(())
            }),
            on_complete: Some(Box::new(on_complete)),
            client: SharedClient::with_store(Arc::new(store.clone())),
        };
        job.cancel(Error::Cancelled("test".into()));

        assert!(errors.recv().unwrap());
        assert_eq!(done.recv().unwrap(), Outcome::Cancelled);
        assert!(store.is_empty());
    }
}
