//! Google Cloud Storage backend implementation
//!
//! Uses the object_store crate. Multipart uploads use the client-buffered
//! strategy from the trait defaults: parts are held by the session and the
//! object is written with a single `put` on completion.
//!
//! # Example
//!
//! ```no_run
//! use polystore::backend::{Backend, GcsBackend, GcsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials fall back to GOOGLE_APPLICATION_CREDENTIALS
//!     let backend = GcsBackend::new(GcsConfig::new("my-bucket"))?;
//!     let info = backend.info("path/to/file.txt").await?;
//!     println!("Size: {} bytes", info.size);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::signer::Signer;
use object_store::{GetOptions, ObjectStore};
use reqwest::Method;
use serde::Deserialize;

use super::cloud::{get_stream, list_prefix, map_store_error, object_path, put_attributes, stored_file};
use super::types::{ByteStream, ListOptions, ListStream, PartSizeLimits, PutOptions, StoredFile, MIB, TIB};
use super::{Backend, DEFAULT_URL_EXPIRY};
use crate::error::{Result, StorageError};

/// Configuration for the GCS backend
#[derive(Debug, Clone, Deserialize)]
pub struct GcsConfig {
    pub bucket: String,

    /// Prefix prepended to every key
    #[serde(default)]
    pub prefix: Option<String>,

    /// Path to a service account JSON file
    #[serde(default)]
    pub service_account_path: Option<String>,

    /// Signed URL lifetime in seconds when the caller gives none
    #[serde(default = "default_signed_url_expiry")]
    pub signed_url_expiry: u64,
}

fn default_signed_url_expiry() -> u64 {
    DEFAULT_URL_EXPIRY.as_secs()
}

impl GcsConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            service_account_path: None,
            signed_url_expiry: default_signed_url_expiry(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_service_account_path(mut self, path: impl Into<String>) -> Self {
        self.service_account_path = Some(path.into());
        self
    }
}

/// Google Cloud Storage backend
pub struct GcsBackend {
    store: Arc<GoogleCloudStorage>,
    config: GcsConfig,
}

impl GcsBackend {
    pub fn new(config: GcsConfig) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::Configuration("GCS bucket name is empty".into()));
        }

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&config.bucket);
        if let Some(path) = &config.service_account_path {
            builder = builder.with_service_account_path(path);
        }

        let store = builder.build().map_err(|e| {
            StorageError::Configuration(format!("failed to create GCS client: {}", e))
        })?;

        tracing::debug!(bucket = %config.bucket, "GCS client ready");

        Ok(Self {
            store: Arc::new(store),
            config,
        })
    }

    fn location(&self, key: &str) -> object_store::path::Path {
        object_path(key, self.config.prefix.as_deref())
    }
}

#[async_trait]
impl Backend for GcsBackend {
    fn backend_name(&self) -> &str {
        "gcs"
    }

    #[tracing::instrument(skip(self, data, options), fields(backend = "gcs", key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile> {
        let size = data.len() as u64;
        let result = self
            .store
            .put_opts(&self.location(key), data.into(), put_attributes(options))
            .await
            .map_err(|e| map_store_error("gcs", key, e))?;

        let mut stored = StoredFile::new(key, size)
            .with_content_type(options.content_type.clone())
            .with_last_modified(Utc::now())
            .with_metadata(options.metadata.clone());
        if let Some(etag) = result.e_tag {
            stored = stored.with_etag(etag);
        }
        Ok(stored)
    }

    #[tracing::instrument(skip(self), fields(backend = "gcs", key = %key))]
    async fn get(&self, key: &str) -> Result<ByteStream> {
        get_stream(self.store.as_ref(), "gcs", key, &self.location(key)).await
    }

    #[tracing::instrument(skip(self), fields(backend = "gcs", key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(&self.location(key))
            .await
            .map_err(|e| map_store_error("gcs", key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.location(key)).await {
            Ok(_) => Ok(true),
            Err(e) => match map_store_error("gcs", key, e) {
                err if err.is_not_found() => Ok(false),
                err => Err(err),
            },
        }
    }

    #[tracing::instrument(skip(self, options), fields(backend = "gcs", prefix = %prefix))]
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
        list_prefix(
            self.store.as_ref(),
            "gcs",
            self.config.prefix.as_deref(),
            prefix,
            options.limit,
        )
        .await
    }

    /// V4 signed GET URL
    #[tracing::instrument(skip(self), fields(backend = "gcs", key = %key))]
    async fn url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
        let expiry = expires_in.unwrap_or(Duration::from_secs(self.config.signed_url_expiry));
        let url = self
            .store
            .signed_url(Method::GET, &self.location(key), expiry)
            .await
            .map_err(|e| map_store_error("gcs", key, e))?;
        Ok(url.to_string())
    }

    #[tracing::instrument(skip(self), fields(backend = "gcs", key = %key))]
    async fn info(&self, key: &str) -> Result<StoredFile> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(&self.location(key), options)
            .await
            .map_err(|e| map_store_error("gcs", key, e))?;

        Ok(stored_file(key, &result.meta, Some(&result.attributes)))
    }

    /// Server-side rewrite into the destination object
    #[tracing::instrument(skip(self), fields(backend = "gcs"))]
    async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        self.store
            .copy(&self.location(source), &self.location(destination))
            .await
            .map_err(|e| map_store_error("gcs", source, e))?;
        self.info(destination).await
    }

    fn part_size_limits(&self) -> PartSizeLimits {
        PartSizeLimits {
            min_part_size: 1,
            max_part_size: 5 * TIB,
            default_part_size: 5 * MIB,
            max_parts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config: GcsConfig = toml::from_str(
            r#"
            bucket = "assets"
            prefix = "site"
            "#,
        )
        .unwrap();

        assert_eq!(config.bucket, "assets");
        assert_eq!(config.prefix.as_deref(), Some("site"));
        assert!(config.service_account_path.is_none());
        assert_eq!(config.signed_url_expiry, 3600);
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let err = GcsBackend::new(GcsConfig::new("")).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
