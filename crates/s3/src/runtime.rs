//! Tokio runtime backing the blocking stream handles

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use blobq_core::Result;

/// Build the runtime a connector and every store it creates share
///
/// Queue workers are plain threads, so they drive SDK futures with
/// `block_on` on this runtime.
pub(crate) fn build_runtime() -> Result<Arc<Runtime>> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("blobq-s3-rt")
        .build()?;
    Ok(Arc::new(runtime))
}
