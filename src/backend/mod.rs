//! Unified backend abstraction for storage services
//!
//! This module provides the [`Backend`] trait implemented by every storage
//! variant: in-memory, local filesystem, and the three object stores
//! (S3, Azure Blob Storage, Google Cloud Storage).
//!
//! # Multipart primitives
//!
//! Each backend exposes `begin_multipart`, `upload_part_raw`,
//! `finalize_multipart` and `abort_multipart`. How they behave depends on the
//! backend's [`MultipartStrategy`]:
//!
//! - **Server-tracked** (S3): parts are stored by the service, completion
//!   sends the ordered part list.
//! - **Staged blocks** (Azure, filesystem): parts are uncommitted blocks
//!   published by a single commit. Abort only releases local state.
//! - **Client-buffered** (memory, GCS): parts are held in the session and
//!   written with one `put` at completion. This is the default
//!   implementation of the trait, so a backend that only has single-shot
//!   writes gets multipart support for free.
//!
//! The [`crate::multipart::MultipartEngine`] owns the session state machine;
//! backends only move bytes.
//!
//! # Example
//!
//! ```no_run
//! use polystore::backend::{Backend, MemoryBackend, PutOptions};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!     backend
//!         .put("greeting.txt", Bytes::from_static(b"hello"), &PutOptions::new())
//!         .await?;
//!     let data = backend.get_bytes("greeting.txt").await?;
//!     assert_eq!(data.as_ref(), b"hello");
//!     Ok(())
//! }
//! ```

pub mod types;

mod filesystem;
mod memory;
mod registry;

#[cfg(any(feature = "azure-native", feature = "gcs-native"))]
mod cloud;

#[cfg(feature = "s3-native")]
mod s3;

#[cfg(feature = "azure-native")]
mod azure;

#[cfg(feature = "gcs-native")]
mod gcs;

pub use filesystem::{FileSystemBackend, FileSystemConfig};
pub use memory::{MemoryBackend, MemoryConfig};
pub use registry::{create_backend, BackendConfig, BackendKind};
pub use types::{
    ByteStream, ListOptions, ListStream, MultipartStrategy, PartSizeLimits, PartTag, PutOptions,
    StoredFile,
};

#[cfg(feature = "s3-native")]
pub use s3::{S3Backend, S3Config};

#[cfg(feature = "azure-native")]
pub use azure::{AzureBackend, AzureConfig};

#[cfg(feature = "gcs-native")]
pub use gcs::{GcsBackend, GcsConfig};

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;

use crate::error::Result;
use crate::multipart::MultipartUpload;

/// Expiry used for presigned / SAS / signed URLs when the caller gives none
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Unified backend trait for all storage operations
///
/// Implementors must be `Send + Sync`; a single backend is shared by every
/// concurrent part upload of a multipart session.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier used in logs and errors (e.g. "memory", "s3")
    fn backend_name(&self) -> &str;

    /// Store `data` at `key`, replacing any existing object
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile>;

    /// Open an object for reading as a stream
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<ByteStream>;

    /// Read an entire object into memory
    async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        let stream = self.get(key).await?;
        let buffer = stream
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(buffer.freeze())
    }

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List objects whose key starts with `prefix`
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream>;

    /// URL granting access to `key`
    ///
    /// Remote backends return a time-limited signed URL valid for
    /// `expires_in` (default one hour). Local backends ignore the expiry.
    async fn url(&self, key: &str, expires_in: Option<Duration>) -> Result<String>;

    /// Metadata for an object without downloading it
    async fn info(&self, key: &str) -> Result<StoredFile>;

    /// Copy an object within this backend
    ///
    /// The default downloads the source and uploads it again.
    async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let info = self.info(source).await?;
        let data = self.get_bytes(source).await?;
        let options = PutOptions {
            content_type: info.content_type,
            metadata: info.metadata,
        };
        self.put(destination, data, &options).await
    }

    /// Move an object within this backend
    ///
    /// The default is copy followed by delete of the source.
    async fn rename(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let stored = self.copy(source, destination).await?;
        self.delete(source).await?;
        Ok(stored)
    }

    /// Release any held resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// How this backend assembles multipart uploads
    fn multipart_strategy(&self) -> MultipartStrategy {
        MultipartStrategy::ClientBuffered
    }

    /// Part size bounds, reported at configuration time
    fn part_size_limits(&self) -> PartSizeLimits {
        PartSizeLimits {
            min_part_size: 1,
            max_part_size: types::TIB * 5,
            default_part_size: types::MIB * 5,
            max_parts: None,
        }
    }

    /// Start a multipart upload
    ///
    /// `part_size` has already been resolved against
    /// [`Backend::part_size_limits`]. The default generates a random upload
    /// id and keeps all state in the returned session.
    async fn begin_multipart(
        &self,
        key: &str,
        part_size: u64,
        options: &PutOptions,
    ) -> Result<MultipartUpload> {
        Ok(MultipartUpload::new(
            uuid::Uuid::new_v4().to_string(),
            key,
            part_size,
            options.content_type.clone(),
            options.metadata.clone(),
        ))
    }

    /// Transfer one part and return its tag
    ///
    /// The default holds the part in the session's local buffer and tags it
    /// with a content digest.
    async fn upload_part_raw(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartTag> {
        let tag = PartTag::new(blake3::hash(&data).to_hex().to_string());
        upload.buffer_part(part_number, data);
        Ok(tag)
    }

    /// Publish the object from `parts`, ordered by part number
    ///
    /// The default concatenates the buffered parts and performs one `put`.
    async fn finalize_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[(u32, PartTag)],
    ) -> Result<StoredFile> {
        let _ = parts;
        let data = upload.assemble_buffered();
        let options = PutOptions {
            content_type: upload.content_type().map(str::to_string),
            metadata: upload.metadata().clone(),
        };
        self.put(upload.key(), data, &options).await
    }

    /// Release everything held for an unfinished upload
    ///
    /// Must be safe to call more than once. The default drops the buffer.
    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<()> {
        upload.discard_buffered();
        Ok(())
    }
}

/// Join a configured prefix and a caller key into a remote object name
pub(crate) fn key_with_prefix(key: &str, prefix: Option<&str>) -> String {
    let key = key.replace('\\', "/");
    let key = key.trim_start_matches('/');

    match prefix.map(|p| p.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, key),
        _ => key.to_string(),
    }
}

/// Strip a configured prefix from a remote object name
pub(crate) fn key_without_prefix(name: &str, prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => match name.strip_prefix(prefix) {
            Some(stripped) => stripped.trim_start_matches('/').to_string(),
            None => name.to_string(),
        },
        _ => name.to_string(),
    }
}
