//! In-memory blob store
//!
//! Intended for tests and embedding. Blobs live in a `RwLock`ed map keyed by
//! bucket and path; writers buffer locally and publish on close.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::traits::{
    BlobInfo, BlobReader, BlobStore, BlobWriter, Credentials, StoreConnector, WriteOptions,
};

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Arc<[u8]>,
    content_type: Option<String>,
    etag: String,
    storage_class: Option<String>,
    metadata: HashMap<String, String>,
    last_modified: jiff::Timestamp,
}

impl StoredBlob {
    fn info(&self, path: &str) -> BlobInfo {
        let mut info = BlobInfo::new(path, self.data.len() as u64);
        info.content_type = self.content_type.clone();
        info.etag = Some(self.etag.clone());
        info.last_modified = Some(self.last_modified);
        info
    }
}

type Buckets = HashMap<String, BTreeMap<String, StoredBlob>>;

#[derive(Debug, Default)]
struct Shared {
    // bucket -> path -> blob; BTreeMap keeps listings sorted
    buckets: RwLock<Buckets>,
    generation: AtomicU64,
}

fn check_preconditions(
    blobs: Option<&BTreeMap<String, StoredBlob>>,
    bucket: &str,
    path: &str,
    options: &WriteOptions,
) -> Result<()> {
    let existing = blobs.and_then(|b| b.get(path));

    if options.requires_absent() && existing.is_some() {
        return Err(Error::PreconditionFailed(format!(
            "{bucket}/{path} already exists"
        )));
    }

    if let Some(expected) = options.required_etag() {
        match existing {
            Some(blob) if blob.etag == expected => {}
            Some(blob) => {
                return Err(Error::PreconditionFailed(format!(
                    "{bucket}/{path} has etag {}, expected {expected}",
                    blob.etag
                )));
            }
            None => return Err(Error::NotFound(format!("{bucket}/{path}"))),
        }
    }

    Ok(())
}

/// In-memory, map-based blob store
///
/// Cloning is cheap; clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs across all buckets
    pub fn len(&self) -> usize {
        self.read_buckets().values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if no blobs are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contents of a blob, if present
    pub fn get(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.read_buckets()
            .get(bucket)
            .and_then(|b| b.get(path))
            .map(|blob| blob.data.to_vec())
    }

    /// Metadata of a blob, if present
    pub fn info(&self, bucket: &str, path: &str) -> Option<BlobInfo> {
        self.read_buckets()
            .get(bucket)
            .and_then(|b| b.get(path))
            .map(|blob| blob.info(path))
    }

    /// User metadata recorded for a blob
    pub fn metadata(&self, bucket: &str, path: &str) -> Option<HashMap<String, String>> {
        self.read_buckets()
            .get(bucket)
            .and_then(|b| b.get(path))
            .map(|blob| blob.metadata.clone())
    }

    /// Storage class recorded for a blob
    pub fn storage_class(&self, bucket: &str, path: &str) -> Option<String> {
        self.read_buckets()
            .get(bucket)
            .and_then(|b| b.get(path))
            .and_then(|blob| blob.storage_class.clone())
    }

    /// Store a blob directly, bypassing any transaction
    pub fn insert(
        &self,
        bucket: &str,
        path: &str,
        data: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) -> BlobInfo {
        let options = WriteOptions {
            content_type: content_type.map(str::to_string),
            target_options: Vec::new(),
        };
        let mut buckets = self.write_buckets();
        self.store_blob(&mut buckets, bucket, path, data.into(), &options)
    }

    fn read_buckets(&self) -> RwLockReadGuard<'_, Buckets> {
        self.shared
            .buckets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_buckets(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.shared
            .buckets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn commit(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        options: &WriteOptions,
    ) -> Result<BlobInfo> {
        let mut buckets = self.write_buckets();

        // Re-checked under the write lock so concurrent writers cannot both win
        check_preconditions(buckets.get(bucket), bucket, path, options)?;
        Ok(self.store_blob(&mut buckets, bucket, path, data, options))
    }

    fn store_blob(
        &self,
        buckets: &mut Buckets,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        options: &WriteOptions,
    ) -> BlobInfo {
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let blob = StoredBlob {
            data: Arc::from(data),
            content_type: options.content_type.clone(),
            etag: format!("{generation:016x}"),
            storage_class: options.storage_class().map(str::to_string),
            metadata: options
                .metadata()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            last_modified: jiff::Timestamp::now(),
        };
        let info = blob.info(path);

        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(path.to_string(), blob);

        info
    }
}

impl BlobStore for MemoryStore {
    fn open_write(
        &self,
        bucket: &str,
        path: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn BlobWriter>> {
        check_preconditions(self.read_buckets().get(bucket), bucket, path, options)?;

        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            bucket: bucket.to_string(),
            path: path.to_string(),
            options: options.clone(),
            buffer: Vec::new(),
        }))
    }

    fn open_read(&self, bucket: &str, path: &str) -> Result<Box<dyn BlobReader>> {
        let buckets = self.read_buckets();
        let blob = buckets
            .get(bucket)
            .and_then(|b| b.get(path))
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{path}")))?;

        Ok(Box::new(MemoryReader {
            info: blob.info(path),
            cursor: Cursor::new(Arc::clone(&blob.data)),
        }))
    }

    fn list_blobs(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let buckets = self.read_buckets();
        let paths = buckets
            .get(bucket)
            .map(|blobs| {
                blobs
                    .range(prefix.to_string()..)
                    .take_while(|(path, _)| path.starts_with(prefix))
                    .map(|(path, _)| path.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(paths)
    }
}

struct MemoryWriter {
    store: MemoryStore,
    bucket: String,
    path: String,
    options: WriteOptions,
    buffer: Vec<u8>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BlobWriter for MemoryWriter {
    fn close(self: Box<Self>) -> Result<BlobInfo> {
        let MemoryWriter {
            store,
            bucket,
            path,
            options,
            buffer,
        } = *self;
        store.commit(&bucket, &path, buffer, &options)
    }

    fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct MemoryReader {
    info: BlobInfo,
    cursor: Cursor<Arc<[u8]>>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl BlobReader for MemoryReader {
    fn info(&self) -> &BlobInfo {
        &self.info
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Connector handing out a shared [`MemoryStore`]
///
/// Rejects credentials with an empty access key, which lets tests exercise
/// connection failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    /// Create a connector over a fresh store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector over an existing store
    pub fn with_store(store: MemoryStore) -> Self {
        Self { store }
    }

    /// The store every connection shares
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl StoreConnector for MemoryConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn BlobStore>> {
        if credentials.access_key.is_empty() {
            return Err(Error::connection("access key cannot be empty"));
        }
        Ok(Arc::new(self.store.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TargetOption;

    fn write_blob(
        store: &MemoryStore,
        path: &str,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<BlobInfo> {
        let mut writer = store.open_write("b", path, options)?;
        writer.write_all(data)?;
        writer.close()
    }

    #[test]
    fn test_write_then_read() {
        let store = MemoryStore::new();
        let options = WriteOptions {
            content_type: Some("text/plain".into()),
            ..Default::default()
        };
        let info = write_blob(&store, "a/b.txt", b"hello", &options).unwrap();
        assert_eq!(info.size_bytes, 5);
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));

        let mut reader = store.open_read("b", "a/b.txt").unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        assert_eq!(reader.info().content_type.as_deref(), Some("text/plain"));
        reader.close().unwrap();
    }

    #[test]
    fn test_nothing_visible_before_close() {
        let store = MemoryStore::new();
        let mut writer = store.open_write("b", "pending", &WriteOptions::default()).unwrap();
        writer.write_all(b"data").unwrap();
        assert!(store.get("b", "pending").is_none());

        writer.abort().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_read_missing_blob() {
        let store = MemoryStore::new();
        let result = store.open_read("b", "missing");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_does_not_exist_precondition() {
        let store = MemoryStore::new();
        store.insert("b", "taken", b"x".to_vec(), None);

        let options = WriteOptions {
            target_options: vec![TargetOption::DoesNotExist],
            ..Default::default()
        };
        let result = store.open_write("b", "taken", &options);
        assert!(matches!(result, Err(Error::PreconditionFailed(_))));

        assert!(write_blob(&store, "free", b"y", &options).is_ok());
    }

    #[test]
    fn test_does_not_exist_checked_again_on_close() {
        let store = MemoryStore::new();
        let options = WriteOptions {
            target_options: vec![TargetOption::DoesNotExist],
            ..Default::default()
        };
        let first = store.open_write("b", "race", &options).unwrap();
        let second = store.open_write("b", "race", &options).unwrap();

        assert!(first.close().is_ok());
        assert!(matches!(second.close(), Err(Error::PreconditionFailed(_))));
    }

    #[test]
    fn test_if_match_precondition() {
        let store = MemoryStore::new();
        let info = store.insert("b", "doc", b"v1".to_vec(), None);
        let etag = info.etag.unwrap();

        let stale = WriteOptions {
            target_options: vec![TargetOption::IfMatch("0".into())],
            ..Default::default()
        };
        assert!(matches!(
            store.open_write("b", "doc", &stale),
            Err(Error::PreconditionFailed(_))
        ));

        let current = WriteOptions {
            target_options: vec![TargetOption::IfMatch(etag.clone())],
            ..Default::default()
        };
        let updated = write_blob(&store, "doc", b"v2", &current).unwrap();
        assert_ne!(updated.etag.unwrap(), etag);
        assert_eq!(store.get("b", "doc").unwrap(), b"v2");
    }

    #[test]
    fn test_attributes_recorded() {
        let store = MemoryStore::new();
        let options = WriteOptions {
            content_type: None,
            target_options: vec![
                TargetOption::StorageClass("COLD".into()),
                TargetOption::Metadata {
                    key: "origin".into(),
                    value: "test".into(),
                },
            ],
        };
        write_blob(&store, "meta", b"z", &options).unwrap();

        assert_eq!(store.storage_class("b", "meta").as_deref(), Some("COLD"));
        assert_eq!(
            store.metadata("b", "meta").unwrap().get("origin").map(String::as_str),
            Some("test")
        );
    }

    #[test]
    fn test_list_blobs_by_prefix() {
        let store = MemoryStore::new();
        store.insert("b", "test/one", b"1".to_vec(), None);
        store.insert("b", "test/two", b"2".to_vec(), None);
        store.insert("b", "other/three", b"3".to_vec(), None);
        store.insert("c", "test/four", b"4".to_vec(), None);

        assert_eq!(
            store.list_blobs("b", "test/").unwrap(),
            vec!["test/one".to_string(), "test/two".to_string()]
        );
        assert_eq!(store.list_blobs("b", "").unwrap().len(), 3);
        assert!(store.list_blobs("missing", "").unwrap().is_empty());
    }

    #[test]
    fn test_connector_rejects_empty_access_key() {
        let connector = MemoryConnector::new();
        let result = connector.connect(&Credentials::new("", "secret"));
        assert!(matches!(result, Err(Error::Connection { .. })));

        let store = connector.connect(&Credentials::new("key", "secret")).unwrap();
        store
            .open_write("b", "x", &WriteOptions::default())
            .unwrap()
            .close()
            .unwrap();
        assert_eq!(connector.store().len(), 1);
    }
}
