//! Object store gateway.
//!
//! [`ObjectStore`] hides where uploaded bytes end up. The production
//! implementation talks to an S3-compatible server; an in-memory one backs
//! the tests.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod s3;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or timed out.
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// The backend was reached but rejected or failed the write.
    #[error("object store write failed: {0}")]
    Write(String),

    #[error("failed to read upload body: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Async object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Create `bucket` if it does not exist yet. Idempotent.
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()>;

    /// Stream the file at `body` (exactly `size` bytes) to `key` and return
    /// the object's URL. No retries.
    fn upload<'a>(
        &'a self,
        key: &'a str,
        body: &'a Path,
        size: u64,
        content_type: &'a str,
    ) -> StoreFuture<'a, String>;
}

/// `scheme://endpoint/bucket/key`.
pub fn object_url(use_ssl: bool, endpoint: &str, bucket: &str, key: &str) -> String {
    let scheme = if use_ssl { "https" } else { "http" };
    format!("{scheme}://{endpoint}/{bucket}/{key}")
}

/// Fail with [`StorageError::Write`] unless the file at `body` holds `size` bytes.
pub(crate) async fn check_body_size(body: &Path, size: u64) -> Result<(), StorageError> {
    let actual = tokio::fs::metadata(body).await?.len();
    if actual != size {
        return Err(StorageError::Write(format!(
            "size mismatch: declared {size} bytes, body has {actual}"
        )));
    }
    Ok(())
}
