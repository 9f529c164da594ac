//! Download transactions

use std::fmt;
use std::sync::Arc;

use tracing::{debug, debug_span, warn};

use super::{
    notify_completion, notify_result, CompletionListener, ListenerResult, Outcome, TransactionId,
};
use crate::client::SharedClient;
use crate::error::{Error, Result};
use crate::queue::{Job, WorkerPool};
use crate::traits::BlobReader;

/// Result listener of a download: receives the read stream or the error
/// that prevented opening it
pub type DownloadListener =
    Box<dyn FnOnce(Result<&mut dyn BlobReader>) -> ListenerResult + Send + 'static>;

/// A download being configured
pub struct DownloadTransaction {
    id: TransactionId,
    bucket: String,
    source_path: String,
    listener: Option<DownloadListener>,
    on_complete: Option<CompletionListener>,
    queue: Arc<WorkerPool<DownloadJob>>,
    client: SharedClient,
}

impl DownloadTransaction {
    pub(crate) fn new(
        bucket: &str,
        source_path: String,
        queue: Arc<WorkerPool<DownloadJob>>,
        client: SharedClient,
    ) -> Self {
        Self {
            id: TransactionId::next(),
            bucket: bucket.to_string(),
            source_path,
            listener: None,
            on_complete: None,
            queue,
            client,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn on_result<F>(mut self, listener: F) -> Self
    where
        F: FnOnce(Result<&mut dyn BlobReader>) -> ListenerResult + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

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
        F: FnOnce(Result<&mut dyn BlobReader>) -> ListenerResult + Send + 'static,
    {
        self.on_result(listener).submit()
    }

    /// Freeze the configuration and enqueue the download
    pub fn submit(self) -> Result<TransactionId> {
        let DownloadTransaction {
            id,
            bucket,
            source_path,
            listener,
            on_complete,
            queue,
            client,
        } = self;

        let Some(listener) = listener else {
            return Err(Error::ListenerMissing(format!(
                "download of '{source_path}' needs a result listener"
            )));
        };
        if source_path.is_empty() {
            return Err(Error::InvalidPath("source path cannot be empty".into()));
        }
        if !queue.is_alive() {
            return Err(not_initialized(&bucket));
        }

        debug!(%id, bucket = %bucket, path = %source_path, "Download submitted");
        let job = DownloadJob {
            id,
            bucket: bucket.clone(),
            source_path,
            listener,
            on_complete,
            client,
        };
        queue.add_item(job).map_err(|e| match e {
            Error::NotInitialized(_) => not_initialized(&bucket),
            other => other,
        })?;
        Ok(id)
    }
}

fn not_initialized(bucket: &str) -> Error {
    Error::NotInitialized(format!(
        "download threads of bucket '{bucket}' were never created"
    ))
}

impl fmt::Debug for DownloadTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTransaction")
            .field("id", &self.id)
            .field("bucket", &self.bucket)
            .field("source_path", &self.source_path)
            .field("has_listener", &self.listener.is_some())
            .field("has_completion", &self.on_complete.is_some())
            .finish()
    }
}

/// A submitted download, owned by the download queue
pub struct DownloadJob {
    id: TransactionId,
    bucket: String,
    source_path: String,
    listener: DownloadListener,
    on_complete: Option<CompletionListener>,
    client: SharedClient,
}

impl DownloadJob {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }
}

impl Job for DownloadJob {
    fn run(self) {
        let DownloadJob {
            id,
            bucket,
            source_path,
            listener,
            on_complete,
            client,
        } = self;

        let span = debug_span!("download", %id, bucket = %bucket, path = %source_path);
        let _guard = span.enter();

        let opened = client
            .current()
            .ok_or(Error::NotConnected)
            .and_then(|store| store.open_read(&bucket, &source_path));

        let outcome = match opened {
            Ok(mut reader) => {
                debug!(size = reader.info().size_bytes, "Read stream opened");
                let handled = notify_result(id, || listener(Ok(&mut *reader)));
                let closed = reader.close();
                match (handled, closed) {
                    (true, Ok(())) => Outcome::Succeeded,
                    (false, closed) => {
                        if let Err(e) = closed {
                            warn!(error = %e, "Failed to close download stream");
                        }
                        Outcome::ListenerFailed
                    }
                    (true, Err(e)) => {
                        warn!(error = %e, "Failed to close download stream");
                        Outcome::CloseFailed
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Unable to open read stream");
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
        let DownloadJob {
            id,
            listener,
            on_complete,
            ..
        } = self;
        notify_result(id, || listener(Err(reason)));
        notify_completion(id, on_complete, Outcome::Cancelled);
    }
}
