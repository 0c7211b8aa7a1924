//! Azure Blob Storage backend implementation
//!
//! Uses block blobs through the object_store crate. Multipart uploads follow
//! the staged-block model: every part is staged as an uncommitted block
//! whose id is derived from the part number, and completion commits the
//! ordered block list in one request. Until that commit nothing is visible
//! at the key, and uncommitted blocks expire on their own, so abort has no
//! remote work to do.
//!
//! The commit is sent as a Put Block List request against a short-lived
//! SAS URL so that it can carry the blob content type and `x-ms-meta-*`
//! metadata; object_store's own block-list commit sends neither.
//!
//! # Example
//!
//! ```no_run
//! use polystore::backend::{AzureBackend, AzureConfig, Backend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Account and key fall back to AZURE_STORAGE_ACCOUNT_NAME / AZURE_STORAGE_ACCOUNT_KEY
//!     let backend = AzureBackend::new(AzureConfig::new("my-container"))?;
//!     let info = backend.info("path/to/file.txt").await?;
//!     println!("Size: {} bytes", info.size);
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::multipart::MultipartStore;
use object_store::signer::Signer;
use object_store::{GetOptions, ObjectStore};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::cloud::{
    classify_status, classify_transport, get_stream, list_prefix, map_store_error, object_path,
    put_attributes, stored_file,
};
use super::types::{
    deserialize_secret, ByteStream, ListOptions, ListStream, MultipartStrategy, PartSizeLimits,
    PartTag, PutOptions, StoredFile, MIB,
};
use super::{Backend, DEFAULT_URL_EXPIRY};
use crate::error::{Result, StorageError};
use crate::multipart::MultipartUpload;

/// Configuration for the Azure backend
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    pub container: String,

    /// Storage account (falls back to the environment)
    #[serde(default)]
    pub account: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret")]
    pub access_key: Option<SecretString>,

    /// Prefix prepended to every key
    #[serde(default)]
    pub prefix: Option<String>,

    /// Talk to a local Azurite emulator
    #[serde(default)]
    pub use_emulator: bool,

    /// SAS URL lifetime in seconds when the caller gives none
    #[serde(default = "default_sas_expiry")]
    pub sas_expiry: u64,
}

/// Service version sent with block-list commits
const AZURE_API_VERSION: &str = "2023-11-03";

/// Lifetime of the SAS URL used for one commit
const COMMIT_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

fn default_sas_expiry() -> u64 {
    DEFAULT_URL_EXPIRY.as_secs()
}

impl AzureConfig {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            account: None,
            access_key: None,
            prefix: None,
            use_emulator: false,
            sas_expiry: default_sas_expiry(),
        }
    }

    pub fn with_account(mut self, account: impl Into<String>, access_key: SecretString) -> Self {
        self.account = Some(account.into());
        self.access_key = Some(access_key);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// Azure Blob Storage backend
pub struct AzureBackend {
    store: Arc<MicrosoftAzure>,
    http: reqwest::Client,
    config: AzureConfig,
}

impl AzureBackend {
    /// Create a backend for `config.container`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` when no account or credentials
    /// can be resolved.
    pub fn new(config: AzureConfig) -> Result<Self> {
        if config.container.is_empty() {
            return Err(StorageError::Configuration(
                "Azure container name is empty".into(),
            ));
        }

        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_container_name(&config.container)
            .with_use_emulator(config.use_emulator);
        if let Some(account) = &config.account {
            builder = builder.with_account(account);
        }
        if let Some(key) = &config.access_key {
            builder = builder.with_access_key(key.expose_secret());
        }

        let store = builder.build().map_err(|e| {
            StorageError::Configuration(format!("failed to create Azure client: {}", e))
        })?;

        tracing::debug!(container = %config.container, "Azure client ready");

        Ok(Self {
            store: Arc::new(store),
            http: reqwest::Client::new(),
            config,
        })
    }

    fn location(&self, key: &str) -> object_store::path::Path {
        object_path(key, self.config.prefix.as_deref())
    }

    /// Put Block List with the session's content type and metadata
    async fn commit_block_list(
        &self,
        upload: &MultipartUpload,
        parts: &[(u32, PartTag)],
    ) -> Result<()> {
        let key = upload.key();
        let headers = commit_headers(upload.content_type(), upload.metadata())?;

        let mut url = self
            .store
            .signed_url(Method::PUT, &self.location(key), COMMIT_URL_EXPIRY)
            .await
            .map_err(|e| map_store_error("azure", key, e))?;
        url.query_pairs_mut().append_pair("comp", "blocklist");

        let response = self
            .http
            .put(url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/xml")
            .body(block_list_xml(parts))
            .send()
            .await
            .map_err(|e| classify_transport("azure", key, &e, &e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(
            "azure",
            key,
            status,
            &format!("block list commit returned {}: {}", status, body),
        ))
    }
}

/// Request body committing `parts` in the given order
///
/// Block ids on the wire are the base64 form of the content ids that
/// object_store returned when each block was staged.
fn block_list_xml(parts: &[(u32, PartTag)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?><BlockList>");
    for (_, tag) in parts {
        xml.push_str("<Latest>");
        xml.push_str(&STANDARD.encode(tag.as_str()));
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// Blob properties applied by the commit
fn commit_headers(
    content_type: Option<&str>,
    metadata: &HashMap<String, String>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-ms-version"),
        HeaderValue::from_static(AZURE_API_VERSION),
    );
    if let Some(content_type) = content_type {
        headers.insert(
            HeaderName::from_static("x-ms-blob-content-type"),
            header_value("content type", content_type)?,
        );
    }
    for (name, value) in metadata {
        let header = HeaderName::from_bytes(format!("x-ms-meta-{}", name).as_bytes())
            .map_err(|_| StorageError::InvalidArgument(format!("invalid metadata name: {}", name)))?;
        headers.insert(header, header_value(name, value)?);
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| StorageError::InvalidArgument(format!("invalid value for {}: {:?}", name, value)))
}

#[async_trait]
impl Backend for AzureBackend {
    fn backend_name(&self) -> &str {
        "azure"
    }

    #[tracing::instrument(skip(self, data, options), fields(backend = "azure", key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile> {
        let size = data.len() as u64;
        let result = self
            .store
            .put_opts(&self.location(key), data.into(), put_attributes(options))
            .await
            .map_err(|e| map_store_error("azure", key, e))?;

        let mut stored = StoredFile::new(key, size)
            .with_content_type(options.content_type.clone())
            .with_last_modified(Utc::now())
            .with_metadata(options.metadata.clone());
        if let Some(etag) = result.e_tag {
            stored = stored.with_etag(etag);
        }
        Ok(stored)
    }

    #[tracing::instrument(skip(self), fields(backend = "azure", key = %key))]
    async fn get(&self, key: &str) -> Result<ByteStream> {
        get_stream(self.store.as_ref(), "azure", key, &self.location(key)).await
    }

    #[tracing::instrument(skip(self), fields(backend = "azure", key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(&self.location(key))
            .await
            .map_err(|e| map_store_error("azure", key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.location(key)).await {
            Ok(_) => Ok(true),
            Err(e) => match map_store_error("azure", key, e) {
                err if err.is_not_found() => Ok(false),
                err => Err(err),
            },
        }
    }

    #[tracing::instrument(skip(self, options), fields(backend = "azure", prefix = %prefix))]
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
        list_prefix(
            self.store.as_ref(),
            "azure",
            self.config.prefix.as_deref(),
            prefix,
            options.limit,
        )
        .await
    }

    /// SAS URL with read permission
    #[tracing::instrument(skip(self), fields(backend = "azure", key = %key))]
    async fn url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
        let expiry = expires_in.unwrap_or(Duration::from_secs(self.config.sas_expiry));
        let url = self
            .store
            .signed_url(Method::GET, &self.location(key), expiry)
            .await
            .map_err(|e| map_store_error("azure", key, e))?;
        Ok(url.to_string())
    }

    #[tracing::instrument(skip(self), fields(backend = "azure", key = %key))]
    async fn info(&self, key: &str) -> Result<StoredFile> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(&self.location(key), options)
            .await
            .map_err(|e| map_store_error("azure", key, e))?;

        Ok(stored_file(key, &result.meta, Some(&result.attributes)))
    }

    /// Server-side copy from the source blob
    #[tracing::instrument(skip(self), fields(backend = "azure"))]
    async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        self.store
            .copy(&self.location(source), &self.location(destination))
            .await
            .map_err(|e| map_store_error("azure", source, e))?;
        self.info(destination).await
    }

    fn multipart_strategy(&self) -> MultipartStrategy {
        MultipartStrategy::StagedBlocks
    }

    fn part_size_limits(&self) -> PartSizeLimits {
        PartSizeLimits {
            min_part_size: 1,
            max_part_size: 4000 * MIB,
            default_part_size: 4 * MIB,
            max_parts: Some(50_000),
        }
    }

    async fn begin_multipart(
        &self,
        key: &str,
        part_size: u64,
        options: &PutOptions,
    ) -> Result<MultipartUpload> {
        // Blob staging has no server-side session; the id only names ours
        Ok(MultipartUpload::new(
            uuid::Uuid::new_v4().to_string(),
            key,
            part_size,
            options.content_type.clone(),
            options.metadata.clone(),
        ))
    }

    #[tracing::instrument(skip(self, upload, data), fields(backend = "azure", upload_id = %upload.upload_id(), size = data.len()))]
    async fn upload_part_raw(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartTag> {
        let part = self
            .store
            .put_part(
                &self.location(upload.key()),
                &upload.upload_id().to_string(),
                part_number as usize,
                data.into(),
            )
            .await
            .map_err(|e| map_store_error("azure", upload.key(), e))?;

        Ok(PartTag::new(part.content_id))
    }

    #[tracing::instrument(skip(self, upload, parts), fields(backend = "azure", upload_id = %upload.upload_id(), parts = parts.len()))]
    async fn finalize_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[(u32, PartTag)],
    ) -> Result<StoredFile> {
        self.commit_block_list(upload, parts).await?;
        tracing::debug!(key = %upload.key(), "Azure block list committed");

        // Report what the service stored rather than what was asked for
        self.info(upload.key()).await
    }

    /// Uncommitted blocks are discarded by the service
    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<()> {
        tracing::debug!(
            upload_id = %upload.upload_id(),
            key = %upload.key(),
            "dropping staged Azure blocks"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config: AzureConfig = toml::from_str(
            r#"
            container = "media"
            account = "devstore"
            access_key = "c2VjcmV0"
            prefix = "uploads"
            "#,
        )
        .unwrap();

        assert_eq!(config.container, "media");
        assert_eq!(config.account.as_deref(), Some("devstore"));
        assert_eq!(config.access_key.unwrap().expose_secret(), "c2VjcmV0");
        assert_eq!(config.sas_expiry, 3600);
        assert!(!config.use_emulator);
    }

    #[test]
    fn test_block_list_keeps_part_order() {
        let parts = vec![
            (1, PartTag::new(format!("{:20}", 1))),
            (2, PartTag::new(format!("{:20}", 2))),
            (3, PartTag::new(format!("{:20}", 3))),
        ];
        let xml = block_list_xml(&parts);

        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</BlockList>"));
        let ids: Vec<String> = parts
            .iter()
            .map(|(_, tag)| format!("<Latest>{}</Latest>", STANDARD.encode(tag.as_str())))
            .collect();
        let positions: Vec<usize> = ids.iter().map(|id| xml.find(id.as_str()).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_commit_carries_content_type_and_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("owner".to_string(), "ops".to_string());
        metadata.insert("Source".to_string(), "camera-7".to_string());

        let headers = commit_headers(Some("image/png"), &metadata).unwrap();

        assert_eq!(headers["x-ms-blob-content-type"], "image/png");
        assert_eq!(headers["x-ms-meta-owner"], "ops");
        assert_eq!(headers["x-ms-meta-source"], "camera-7");
        assert_eq!(headers["x-ms-version"], AZURE_API_VERSION);
    }

    #[test]
    fn test_commit_without_attributes_sets_only_version() {
        let headers = commit_headers(None, &HashMap::new()).unwrap();
        assert_eq!(headers.len(), 1);
        assert!(headers.get("x-ms-blob-content-type").is_none());
    }

    #[test]
    fn test_commit_rejects_unencodable_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("bad name".to_string(), "v".to_string());
        let err = commit_headers(None, &metadata).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOperation);

        let mut metadata = HashMap::new();
        metadata.insert("note".to_string(), "line\nbreak".to_string());
        assert!(commit_headers(None, &metadata).is_err());
    }

    #[test]
    fn test_empty_container_rejected() {
        let err = AzureBackend::new(AzureConfig::new("")).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
