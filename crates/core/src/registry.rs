//! Bucket registry and shared client connection
//!
//! A [`StorageRegistry`] owns one [`Bucket`] per name and the store client
//! all of them use. Construct one per process (or per test) and share it by
//! reference or `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::bucket::Bucket;
use crate::client::SharedClient;
use crate::error::{Error, Result};
use crate::traits::{Credentials, StoreConnector};

/// Map of bucket name to bucket, plus the shared client connection
pub struct StorageRegistry {
    connector: Box<dyn StoreConnector>,
    credentials: Mutex<Option<Credentials>>,
    buckets: Mutex<HashMap<String, Arc<Bucket>>>,
    client: SharedClient,
}

impl StorageRegistry {
    /// Create a registry that builds its client with `connector`
    pub fn new<C: StoreConnector + 'static>(connector: C) -> Self {
        Self {
            connector: Box::new(connector),
            credentials: Mutex::new(None),
            buckets: Mutex::new(HashMap::new()),
            client: SharedClient::new(),
        }
    }

    /// Store credentials for a later [`StorageRegistry::connect`]
    pub fn set_credentials(&self, credentials: Credentials) {
        *lock(&self.credentials) = Some(credentials);
    }

    /// Build the shared client from the stored credentials
    ///
    /// On failure the previously connected client, if any, stays in use.
    pub fn connect(&self) -> Result<()> {
        let credentials = lock(&self.credentials)
            .clone()
            .ok_or(Error::MissingCredentials)?;

        let store = self.connector.connect(&credentials).map_err(|e| match e {
            Error::Connection { .. } => e,
            other => Error::connection(other),
        });

        match store {
            Ok(store) => {
                self.client.replace(store);
                info!(
                    endpoint = credentials.endpoint.as_deref().unwrap_or("default"),
                    region = %credentials.region,
                    "Storage client connected"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Storage client connection failed");
                Err(e)
            }
        }
    }

    /// Connect if credentials were supplied; otherwise do nothing
    pub fn init(&self) -> Result<()> {
        if lock(&self.credentials).is_some() {
            self.connect()
        } else {
            Ok(())
        }
    }

    /// The bucket named `name`, created on first request
    pub fn get_or_create_bucket(&self, name: &str) -> Arc<Bucket> {
        let mut buckets = lock(&self.buckets);
        Arc::clone(
            buckets
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Bucket::new(name, self.client.clone()))),
        )
    }

    /// The bucket named `name`, if it was created
    pub fn bucket(&self, name: &str) -> Option<Arc<Bucket>> {
        lock(&self.buckets).get(name).cloned()
    }

    /// Names of all created buckets, sorted
    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.buckets).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Drain and stop the queues of every bucket
    pub fn shutdown(&self) {
        let buckets: Vec<Arc<Bucket>> = lock(&self.buckets).values().cloned().collect();
        for bucket in &buckets {
            bucket.shutdown();
        }
        info!(buckets = buckets.len(), "Storage registry shut down");
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("buckets", &self.bucket_names())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
