//! S3-compatible gateway (MinIO, AWS S3, ...).
//!
//! Uses path-style addressing and static credentials from config. Every
//! operation is bounded by the configured timeout.

use std::path::Path;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{check_body_size, object_url, ObjectStore, StorageError, StoreFuture};
use crate::config::MinioConfig;

pub struct S3Gateway {
    client: Client,
    bucket: String,
    endpoint: String,
    use_ssl: bool,
}

impl S3Gateway {
    pub async fn new(config: &MinioConfig) -> Self {
        let endpoint_url = endpoint_url(config.use_ssl, &config.endpoint);
        let creds = aws_sdk_s3::config::Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "mediahub-config",
        );
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build();

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(&endpoint_url)
            .credentials_provider(creds)
            .timeout_config(timeouts)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        info!(endpoint = %endpoint_url, bucket = %config.bucket, "object store client initialized");

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            use_ssl: config.use_ssl,
        }
    }
}

fn endpoint_url(use_ssl: bool, endpoint: &str) -> String {
    let scheme = if use_ssl { "https" } else { "http" };
    format!("{scheme}://{endpoint}")
}

/// Timeouts and connection failures mean the store is unreachable; anything
/// the store answered with is a failed write.
fn map_sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{context}: {}", aws_sdk_s3::error::DisplayErrorContext(&err));
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            StorageError::Unavailable(detail)
        }
        _ => StorageError::Write(detail),
    }
}

impl ObjectStore for S3Gateway {
    fn ensure_bucket<'a>(&'a self, bucket: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => {
                    debug!(bucket, "bucket exists");
                    Ok(())
                }
                Err(SdkError::ServiceError(err)) if err.err().is_not_found() => {
                    self.client
                        .create_bucket()
                        .bucket(bucket)
                        .send()
                        .await
                        .map_err(|e| map_sdk_error("create_bucket", e))?;
                    info!(bucket, "bucket created");
                    Ok(())
                }
                Err(err) => Err(map_sdk_error("head_bucket", err)),
            }
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
            check_body_size(body, size).await?;
            let stream = ByteStream::from_path(body)
                .await
                .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

            debug!(bucket = %self.bucket, key, size, "put_object");

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_length(size as i64)
                .content_type(content_type)
                .body(stream)
                .send()
                .await
                .map_err(|e| map_sdk_error("put_object", e))?;

            Ok(object_url(self.use_ssl, &self.endpoint, &self.bucket, key))
        })
    }
}
