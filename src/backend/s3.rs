//! S3 backend implementation
//!
//! Talks to AWS S3 and S3-compatible services (MinIO, LocalStack, R2) with
//! the native AWS SDK. Multipart uploads are server-tracked: the service
//! assigns the upload id, stores every part and publishes the object when
//! the ordered part list is sent.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::types::{
    deserialize_secret, ByteStream, ListOptions, ListStream, MultipartStrategy, PartSizeLimits,
    PartTag, PutOptions, StoredFile, GIB, MIB,
};
use super::{key_with_prefix, key_without_prefix, Backend, DEFAULT_URL_EXPIRY};
use crate::error::{Result, StorageError};
use crate::multipart::MultipartUpload;

/// S3 error codes worth retrying
const TRANSIENT_CODES: &[&str] = &[
    "RequestTimeout",
    "ServiceUnavailable",
    "InternalError",
    "SlowDown",
    "RequestTimeTooSkewed",
];

/// Configuration for the S3 backend
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub bucket: String,

    /// Region (falls back to the SDK default provider chain)
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Prefix prepended to every key
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret")]
    pub secret_access_key: Option<SecretString>,

    /// Session token for temporary credentials
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub session_token: Option<SecretString>,

    /// Path-style addressing (required for MinIO, LocalStack)
    #[serde(default)]
    pub force_path_style: bool,

    /// Presigned URL lifetime in seconds when the caller gives none
    #[serde(default = "default_presigned_expiry")]
    pub presigned_expiry: u64,

    /// Per-operation timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_presigned_expiry() -> u64 {
    DEFAULT_URL_EXPIRY.as_secs()
}

fn default_timeout() -> u64 {
    300
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            prefix: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: false,
            presigned_expiry: default_presigned_expiry(),
            timeout_seconds: default_timeout(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set explicit credentials instead of the default chain
    pub fn with_credentials(mut self, access_key_id: impl Into<String>, secret: SecretString) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret);
        self
    }

    pub fn with_force_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StorageError::Configuration("S3 bucket name is empty".into()));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(StorageError::Configuration(
                "S3 access_key_id and secret_access_key must be set together".into(),
            ));
        }
        Ok(())
    }
}

/// S3 backend
///
/// # Example
///
/// ```no_run
/// use polystore::backend::{Backend, S3Backend, S3Config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = S3Config::new("my-bucket").with_region("us-east-1");
///     let backend = S3Backend::new(config).await?;
///     let info = backend.info("path/to/file.txt").await?;
///     println!("Size: {} bytes", info.size);
///     Ok(())
/// }
/// ```
pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    /// Build the SDK client from configuration
    ///
    /// Credentials come from the config when set, otherwise from the SDK's
    /// default chain (environment, profile, instance metadata).
    pub async fn new(config: S3Config) -> Result<Self> {
        config.validate()?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region_provider = match &config.region {
            Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
            None => RegionProviderChain::default_provider(),
        };
        loader = loader.region(region_provider);

        if let (Some(access_key), Some(secret)) = (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key,
                secret.expose_secret(),
                config
                    .session_token
                    .as_ref()
                    .map(|t| t.expose_secret().to_string()),
                None,
                "polystore-s3-explicit",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let timeout = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build();
        builder = builder.timeout_config(timeout);

        tracing::debug!(bucket = %config.bucket, region = ?config.region, "S3 client ready");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn object_key(&self, key: &str) -> String {
        key_with_prefix(key, self.config.prefix.as_deref())
    }
}

/// Map an SDK failure onto the error taxonomy
fn map_sdk_error<E, R>(key: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::fmt::Debug,
    R: std::fmt::Debug,
{
    let transport = matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
    );
    classify_error(key, &format!("{:?}", err), transport)
}

/// Classify a failure from its debug rendering
///
/// Transport failures and throttling codes are connection errors, so the
/// retry executor picks them up.
fn classify_error(key: &str, detail: &str, transport: bool) -> StorageError {
    if transport || TRANSIENT_CODES.iter().any(|code| detail.contains(code)) {
        StorageError::connection("s3", detail)
    } else if detail.contains("NoSuchKey") || detail.contains("NotFound") || detail.contains("404") {
        StorageError::not_found(key)
    } else if detail.contains("AccessDenied") || detail.contains("Forbidden") {
        StorageError::PermissionDenied {
            key: key.to_string(),
            message: "access denied".to_string(),
        }
    } else if detail.contains("NoSuchBucket") || detail.contains("InvalidAccessKeyId") {
        StorageError::Configuration(format!("S3 rejected configuration: {}", detail))
    } else if detail.contains("EntityTooLarge") {
        StorageError::Capacity(format!("object {} too large", key))
    } else {
        StorageError::backend("s3", detail)
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl Backend for S3Backend {
    fn backend_name(&self) -> &str {
        "s3"
    }

    #[tracing::instrument(skip(self, data, options), fields(backend = "s3", key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile> {
        let size = data.len() as u64;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(key))
            .body(S3ByteStream::from(data));

        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        for (k, v) in &options.metadata {
            request = request.metadata(k, v);
        }

        let response = request.send().await.map_err(|e| map_sdk_error(key, e))?;

        let mut stored = StoredFile::new(key, size)
            .with_content_type(options.content_type.clone())
            .with_last_modified(Utc::now())
            .with_metadata(options.metadata.clone());
        if let Some(etag) = response.e_tag() {
            stored = stored.with_etag(etag);
        }
        Ok(stored)
    }

    #[tracing::instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn get(&self, key: &str) -> Result<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        let reader = output.body.into_async_read();
        Ok(Box::pin(ReaderStream::with_capacity(reader, MIB as usize).map_err(StorageError::from)))
    }

    #[tracing::instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.info(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self, options), fields(backend = "s3", prefix = %prefix))]
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
        let client = self.client.clone();
        let bucket = self.config.bucket.clone();
        let key_prefix = self.config.prefix.clone();
        let full_prefix = self.object_key(prefix);
        let limit = options.limit.unwrap_or(usize::MAX);

        // State is the continuation token; None ends the stream
        let pages = stream::unfold(Some(None::<String>), move |token| {
            let client = client.clone();
            let bucket = bucket.clone();
            let key_prefix = key_prefix.clone();
            let full_prefix = full_prefix.clone();

            async move {
                let token = token?;
                let mut request = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&full_prefix);
                if let Some(t) = &token {
                    request = request.continuation_token(t);
                }
                if limit < 1000 {
                    request = request.max_keys(limit as i32);
                }

                let response = match request.send().await {
                    Ok(r) => r,
                    Err(e) => return Some((vec![Err(map_sdk_error(&full_prefix, e))], None)),
                };

                let files: Vec<Result<StoredFile>> = response
                    .contents()
                    .iter()
                    .filter_map(|object| {
                        let name = object.key()?;
                        let relative = key_without_prefix(name, key_prefix.as_deref());
                        let mut file =
                            StoredFile::new(relative, object.size().unwrap_or(0).max(0) as u64);
                        if let Some(etag) = object.e_tag() {
                            file = file.with_etag(etag);
                        }
                        if let Some(modified) = object.last_modified().and_then(to_chrono) {
                            file = file.with_last_modified(modified);
                        }
                        Some(Ok(file))
                    })
                    .collect();

                let next = if response.is_truncated().unwrap_or(false) {
                    response
                        .next_continuation_token()
                        .map(|t| Some(t.to_string()))
                } else {
                    None
                };
                Some((files, next))
            }
        });

        Ok(Box::pin(pages.flat_map(stream::iter).take(limit)))
    }

    #[tracing::instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
        let expiry = expires_in.unwrap_or(Duration::from_secs(self.config.presigned_expiry));
        let presigning = PresigningConfig::expires_in(expiry).map_err(|e| {
            StorageError::InvalidArgument(format!("invalid presign expiry {:?}: {}", expiry, e))
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(key))
            .presigned(presigning)
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        Ok(request.uri().to_string())
    }

    #[tracing::instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn info(&self, key: &str) -> Result<StoredFile> {
        let response = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let mut file = StoredFile::new(key, size)
            .with_content_type(response.content_type().map(str::to_string));
        if let Some(etag) = response.e_tag() {
            file = file.with_etag(etag);
        }
        if let Some(modified) = response.last_modified().and_then(to_chrono) {
            file = file.with_last_modified(modified);
        }
        if let Some(metadata) = response.metadata() {
            file = file.with_metadata(metadata.clone());
        }
        Ok(file)
    }

    /// Server-side copy, limited to the 5 GiB single-request copy size
    #[tracing::instrument(skip(self), fields(backend = "s3"))]
    async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let source_key = self.object_key(source);
        self.client
            .copy_object()
            .bucket(&self.config.bucket)
            .copy_source(format!("{}/{}", self.config.bucket, source_key))
            .key(self.object_key(destination))
            .send()
            .await
            .map_err(|e| map_sdk_error(source, e))?;

        self.info(destination).await
    }

    fn multipart_strategy(&self) -> MultipartStrategy {
        MultipartStrategy::ServerTracked
    }

    fn part_size_limits(&self) -> PartSizeLimits {
        PartSizeLimits {
            min_part_size: 5 * MIB,
            max_part_size: 5 * GIB,
            default_part_size: 5 * MIB,
            max_parts: Some(10_000),
        }
    }

    #[tracing::instrument(skip(self, options), fields(backend = "s3", key = %key))]
    async fn begin_multipart(
        &self,
        key: &str,
        part_size: u64,
        options: &PutOptions,
    ) -> Result<MultipartUpload> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(self.object_key(key));

        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        for (k, v) in &options.metadata {
            request = request.metadata(k, v);
        }

        let response = request.send().await.map_err(|e| map_sdk_error(key, e))?;
        let upload_id = response
            .upload_id()
            .ok_or_else(|| StorageError::backend("s3", "no upload id returned"))?;

        Ok(MultipartUpload::new(
            upload_id,
            key,
            part_size,
            options.content_type.clone(),
            options.metadata.clone(),
        ))
    }

    #[tracing::instrument(skip(self, upload, data), fields(backend = "s3", upload_id = %upload.upload_id(), size = data.len()))]
    async fn upload_part_raw(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartTag> {
        let number = i32::try_from(part_number).map_err(|_| StorageError::InvalidPart {
            upload_id: upload.upload_id().to_string(),
            part_number,
            reason: "part number out of range".to_string(),
        })?;

        let response = self
            .client
            .upload_part()
            .bucket(&self.config.bucket)
            .key(self.object_key(upload.key()))
            .upload_id(upload.upload_id())
            .part_number(number)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(upload.key(), e))?;

        let etag = response.e_tag().ok_or_else(|| {
            StorageError::backend("s3", format!("no ETag returned for part {}", part_number))
        })?;
        Ok(PartTag::new(etag))
    }

    #[tracing::instrument(skip(self, upload, parts), fields(backend = "s3", upload_id = %upload.upload_id(), parts = parts.len()))]
    async fn finalize_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[(u32, PartTag)],
    ) -> Result<StoredFile> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|(number, tag)| {
                CompletedPart::builder()
                    .part_number(*number as i32)
                    .e_tag(tag.as_str())
                    .build()
            })
            .collect();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&self.config.bucket)
            .key(self.object_key(upload.key()))
            .upload_id(upload.upload_id())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(upload.key(), e))?;

        let mut stored = StoredFile::new(upload.key(), upload.completed_bytes())
            .with_content_type(upload.content_type().map(str::to_string))
            .with_last_modified(Utc::now())
            .with_metadata(upload.metadata().clone());
        if let Some(etag) = response.e_tag() {
            stored = stored.with_etag(etag);
        }
        Ok(stored)
    }

    #[tracing::instrument(skip(self, upload), fields(backend = "s3", upload_id = %upload.upload_id()))]
    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<()> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(self.object_key(upload.key()))
            .upload_id(upload.upload_id())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // Already aborted or completed elsewhere
            Err(e) => match map_sdk_error(upload.key(), e) {
                err if err.is_not_found() || format!("{:?}", err).contains("NoSuchUpload") => Ok(()),
                err => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_classify_not_found() {
        let err = classify_error("a.txt", "ServiceError { NoSuchKey }", false);
        assert!(err.is_not_found());

        let err = classify_error("a.txt", "status: 404", false);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_classify_transient_as_connection() {
        assert_eq!(
            classify_error("a", "ServiceError { code: SlowDown }", false).kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            classify_error("a", "dispatch failure: io", true).kind(),
            ErrorKind::Connection
        );
    }

    #[test]
    fn test_classify_permission_and_config() {
        assert_eq!(
            classify_error("a", "AccessDenied", false).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_error("a", "NoSuchBucket", false).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            classify_error("a", "EntityTooLarge", false).kind(),
            ErrorKind::Capacity
        );
        assert_eq!(classify_error("a", "weird", false).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_config_validation() {
        assert!(S3Config::new("").validate().is_err());
        assert!(S3Config::new("bucket").validate().is_ok());

        let mut config = S3Config::new("bucket");
        config.access_key_id = Some("AKIA".into());
        assert!(config.validate().is_err());

        let config = S3Config::new("bucket")
            .with_credentials("AKIA", SecretString::new("secret".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config: S3Config = toml::from_str(
            r#"
            bucket = "media"
            region = "eu-west-1"
            prefix = "uploads"
            access_key_id = "AKIA"
            secret_access_key = "shh"
            "#,
        )
        .unwrap();

        assert_eq!(config.bucket, "media");
        assert_eq!(config.prefix.as_deref(), Some("uploads"));
        assert_eq!(config.secret_access_key.unwrap().expose_secret(), "shh");
        assert_eq!(config.presigned_expiry, 3600);
        assert!(!config.force_path_style);
    }
}
