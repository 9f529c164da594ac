//! Upload and download transactions
//!
//! A transaction is built through a bucket factory, configured with chained
//! setters, and frozen by `execute`/`submit`: the builder is consumed and a
//! private job is handed to the bucket's queue. Nothing can touch the
//! configuration after that point.
//!
//! Every submitted transaction calls its result listener exactly once and
//! then its completion listener exactly once, on a worker thread. The
//! stream handed to the result listener is only valid for the duration of
//! that call; it is closed by the worker as soon as the listener returns.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

use crate::queue::panic_message;

mod download;
mod upload;

pub use download::{DownloadJob, DownloadTransaction};
pub use upload::{UploadJob, UploadTransaction};

/// Return type of result listeners; an `Err` is logged and suppressed
pub type ListenerResult = anyhow::Result<()>;

/// Completion callback, invoked once after the result listener
pub type CompletionListener = Box<dyn FnOnce(Outcome) + Send + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// How a transaction ended, reported to the completion listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The listener handled the stream and the handle closed cleanly
    Succeeded,
    /// The stream could not be opened; the listener received the error
    TransferFailed,
    /// The listener returned an error or panicked
    ListenerFailed,
    /// The listener succeeded but releasing the handle failed
    CloseFailed,
    /// The transaction was removed from its queue before it ran
    Cancelled,
}

/// Run a result listener, containing both errors and panics
///
/// Returns `true` when the listener returned `Ok`.
pub(crate) fn notify_result<F>(id: TransactionId, listener: F) -> bool
where
    F: FnOnce() -> ListenerResult,
{
    match panic::catch_unwind(AssertUnwindSafe(listener)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(%id, error = %format!("{e:#}"), "Error while handling transaction result");
            false
        }
        Err(payload) => {
            error!(%id, panic = panic_message(payload.as_ref()), "Result listener panicked");
            false
        }
    }
}

/// Run the completion listener, if any, containing panics
pub(crate) fn notify_completion(
    id: TransactionId,
    listener: Option<CompletionListener>,
    outcome: Outcome,
) {
    let Some(listener) = listener else {
        return;
    };
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || listener(outcome))) {
        error!(%id, panic = panic_message(payload.as_ref()), "Completion listener panicked");
    }
}
