//! Common types for backend abstraction

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, StorageError};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Async stream of file data
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Async stream of listed files
pub type ListStream = Pin<Box<dyn Stream<Item = Result<StoredFile>> + Send>>;

/// Record describing a stored file after a completed operation
///
/// `key` is always backend-relative and never includes a configured prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub key: String,

    /// Size in bytes
    pub size: u64,

    /// MIME type / content type
    pub content_type: Option<String>,

    /// ETag or checksum, format is backend-defined
    pub etag: Option<String>,

    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,

    /// Custom metadata key-value pairs
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StoredFile {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            content_type: None,
            etag: None,
            last_modified: None,
            metadata: HashMap::new(),
        }
    }

    /// Builder pattern: set content type
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Builder pattern: set etag
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Builder pattern: set modification time
    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Builder pattern: set custom metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Options for single-shot writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Content type / MIME type
    pub content_type: Option<String>,

    /// Custom metadata
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set custom metadata
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Options for list operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Maximum number of entries to return (None = unlimited)
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// How a backend assembles a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultipartStrategy {
    /// Parts are stored by the service; completion sends the ordered tag list
    ServerTracked,
    /// Parts are uncommitted blocks published by one commit of the block list
    StagedBlocks,
    /// Parts are held in local memory and written with one put at completion.
    /// Memory use equals the full object size.
    ClientBuffered,
}

impl fmt::Display for MultipartStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartStrategy::ServerTracked => f.write_str("server-tracked"),
            MultipartStrategy::StagedBlocks => f.write_str("staged-blocks"),
            MultipartStrategy::ClientBuffered => f.write_str("client-buffered"),
        }
    }
}

/// Part size bounds reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSizeLimits {
    /// Smallest part accepted, except for the last part
    pub min_part_size: u64,
    pub max_part_size: u64,
    /// Used when the caller does not request a size
    pub default_part_size: u64,
    /// Highest part number accepted (None = unlimited)
    pub max_parts: Option<u32>,
}

impl PartSizeLimits {
    /// Resolve a requested part size against these bounds
    ///
    /// Requests below the minimum are raised to it. Requests above the
    /// maximum are rejected.
    pub fn resolve(&self, requested: Option<u64>) -> Result<u64> {
        let size = requested.unwrap_or(self.default_part_size);
        if size > self.max_part_size {
            return Err(StorageError::Configuration(format!(
                "part size {} exceeds backend maximum {}",
                size, self.max_part_size
            )));
        }
        Ok(size.max(self.min_part_size).max(1))
    }

    /// Part size and part count for a payload of `total` bytes
    ///
    /// `part_size` is raised when `total` would need more parts than the
    /// backend accepts. Fails when even the largest part size is not enough,
    /// or when the count does not fit a part number.
    pub fn fit(&self, total: u64, part_size: u64) -> Result<(u64, u32)> {
        let mut size = part_size.max(1);
        if let Some(max_parts) = self.max_parts {
            let needed = total.div_ceil(u64::from(max_parts.max(1)));
            if needed > size {
                if needed > self.max_part_size {
                    return Err(StorageError::Configuration(format!(
                        "{} bytes need more than {} parts even at the maximum part size {}",
                        total, max_parts, self.max_part_size
                    )));
                }
                size = needed;
            }
        }

        let count = u32::try_from(total.div_ceil(size)).map_err(|_| {
            StorageError::Configuration(format!(
                "{} bytes in {}-byte parts exceed the part number range",
                total, size
            ))
        })?;
        Ok((size, count))
    }
}

/// Opaque per-part identifier returned by a backend
///
/// Meaningful only to the backend that produced it (an S3 ETag, an Azure
/// block id, or a content digest for client-buffered parts).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartTag(String);

impl PartTag {
    pub fn new(tag: impl Into<String>) -> Self {
        PartTag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wrap an in-memory payload as a single-chunk stream
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Quoted blake3 digest used as the etag by local backends
pub fn content_etag(data: &[u8]) -> String {
    format!("\"{}\"", blake3::hash(data).to_hex())
}

/// Deserialize an optional credential straight into a [`SecretString`]
#[cfg_attr(not(any(feature = "s3-native", feature = "azure-native")), allow(dead_code))]
pub(crate) fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|s| SecretString::new(s.into_boxed_str())))
}
