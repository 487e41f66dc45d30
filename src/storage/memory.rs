//! In-memory object store.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use super::{check_body_size, object_url, ObjectStore, StorageError, StoreFuture};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

pub struct MemoryStore {
    endpoint: String,
    bucket: String,
    buckets: RwLock<HashSet<String>>,
    objects: RwLock<HashMap<String, MemoryObject>>,
    uploads: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl MemoryStore {
    pub fn new(endpoint: &str, bucket: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            bucket: bucket.to_string(),
            buckets: RwLock::new(HashSet::new()),
            objects: RwLock::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// Make every following upload fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_uploads.store(unavailable, Ordering::SeqCst);
    }

    /// Number of upload calls received, successful or not.
    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().unwrap().contains(bucket)
    }

    pub fn get(&self, key: &str) -> Option<MemoryObject> {
        self.objects.read().unwrap().get(key).cloned()
    }

    /// Resolve a URL previously returned by `upload`.
    pub fn get_by_url(&self, url: &str) -> Option<MemoryObject> {
        let prefix = object_url(false, &self.endpoint, &self.bucket, "");
        url.strip_prefix(&prefix).and_then(|key| self.get(key))
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().unwrap().len()
    }
}

impl ObjectStore for MemoryStore {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.buckets.write().unwrap().insert(bucket.to_string());
            Ok(())
        })
    }

    fn upload<'a>(
        &'a self,
        key: &'a str,
        body: &'a Path,
        size: u64,
        content_type: &'a str,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("memory store offline".into()));
            }
            check_body_size(body, size).await?;
            let data = tokio::fs::read(body).await?;
            self.objects.write().unwrap().insert(
                key.to_string(),
                MemoryObject {
                    data,
                    content_type: content_type.to_string(),
                },
            );
            Ok(object_url(false, &self.endpoint, &self.bucket, key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn body(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[tokio::test]
    async fn test_ensure_bucket_idempotent() {
        let store = MemoryStore::new("localhost:9000", "uploads");
        store.ensure_bucket("uploads").await.unwrap();
        store.ensure_bucket("uploads").await.unwrap();
        assert!(store.has_bucket("uploads"));
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        let store = MemoryStore::new("localhost:9000", "uploads");
        let file = body(b"hello");
        let url = store
            .upload("uid_1/a.txt", file.path(), 5, "text/plain")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:9000/uploads/uid_1/a.txt");

        let object = store.get_by_url(&url).unwrap();
        assert_eq!(object.data, b"hello");
        assert_eq!(object.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_same_key_overwrites() {
        let store = MemoryStore::new("localhost:9000", "uploads");
        let first = body(b"one");
        let second = body(b"second");
        store.upload("uid_1/a.txt", first.path(), 3, "text/plain").await.unwrap();
        store.upload("uid_1/a.txt", second.path(), 6, "text/plain").await.unwrap();
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.get("uid_1/a.txt").unwrap().data, b"second");
    }

    #[tokio::test]
    async fn test_size_mismatch_is_write_error() {
        let store = MemoryStore::new("localhost:9000", "uploads");
        let file = body(b"hello");
        let err = store
            .upload("k", file.path(), 4, "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Write(_)));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new("localhost:9000", "uploads");
        store.set_unavailable(true);
        let file = body(b"x");
        let err = store.upload("k", file.path(), 1, "text/plain").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert_eq!(store.upload_calls(), 1);
    }
}
