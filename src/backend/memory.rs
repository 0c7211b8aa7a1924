//! In-memory storage backend
//!
//! Keeps every object in a map guarded by an async `RwLock`. Intended for
//! tests and development: data is lost when the backend is dropped.
//! Multipart uploads use the client-buffered strategy from the trait
//! defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::types::{
    bytes_stream, content_etag, ByteStream, ListOptions, ListStream, PartSizeLimits, PutOptions,
    StoredFile, MIB, TIB,
};
use super::Backend;
use crate::error::{Result, StorageError};

/// Configuration for in-memory storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum total bytes to store (None = unlimited)
    #[serde(default)]
    pub max_size: Option<u64>,
}

struct Entry {
    data: Bytes,
    file: StoredFile,
}

/// In-memory storage backend
pub struct MemoryBackend {
    config: MemoryConfig,
    files: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryBackend {
    /// Create an unlimited in-memory backend
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            config,
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Total bytes currently stored
    pub async fn total_size(&self) -> u64 {
        self.files
            .read()
            .await
            .values()
            .map(|e| e.data.len() as u64)
            .sum()
    }

    fn check_capacity(&self, files: &BTreeMap<String, Entry>, key: &str, incoming: u64) -> Result<()> {
        let Some(max_size) = self.config.max_size else {
            return Ok(());
        };

        let current: u64 = files
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, e)| e.data.len() as u64)
            .sum();

        if current + incoming > max_size {
            return Err(StorageError::Capacity(format!(
                "max size {} would be exceeded storing {} ({} bytes)",
                max_size, key, incoming
            )));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn backend_name(&self) -> &str {
        "memory"
    }

    #[tracing::instrument(skip(self, data, options), fields(backend = "memory", key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile> {
        let mut files = self.files.write().await;
        self.check_capacity(&files, key, data.len() as u64)?;

        let file = StoredFile::new(key, data.len() as u64)
            .with_content_type(options.content_type.clone())
            .with_etag(content_etag(&data))
            .with_last_modified(Utc::now())
            .with_metadata(options.metadata.clone());

        files.insert(
            key.to_string(),
            Entry {
                data,
                file: file.clone(),
            },
        );
        Ok(file)
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        Ok(bytes_stream(self.get_bytes(key).await?))
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        self.files
            .read()
            .await
            .get(key)
            .map(|e| e.data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.files.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(key)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.files.read().await.contains_key(key))
    }

    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
        let files = self.files.read().await;
        let limit = options.limit.unwrap_or(usize::MAX);

        // Snapshot so the lock is not held while the caller drains the stream
        let matched: Vec<Result<StoredFile>> = files
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(_, e)| Ok(e.file.clone()))
            .collect();

        Ok(Box::pin(stream::iter(matched)))
    }

    async fn url(&self, key: &str, _expires_in: Option<Duration>) -> Result<String> {
        Ok(format!("memory://{}", key))
    }

    async fn info(&self, key: &str) -> Result<StoredFile> {
        self.files
            .read()
            .await
            .get(key)
            .map(|e| e.file.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let mut files = self.files.write().await;
        let (data, source_file) = match files.get(source) {
            Some(e) => (e.data.clone(), e.file.clone()),
            None => return Err(StorageError::not_found(source)),
        };
        self.check_capacity(&files, destination, data.len() as u64)?;

        let file = StoredFile {
            key: destination.to_string(),
            last_modified: Some(Utc::now()),
            ..source_file
        };
        files.insert(
            destination.to_string(),
            Entry {
                data,
                file: file.clone(),
            },
        );
        Ok(file)
    }

    async fn rename(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let mut files = self.files.write().await;
        let entry = files
            .remove(source)
            .ok_or_else(|| StorageError::not_found(source))?;

        let file = StoredFile {
            key: destination.to_string(),
            last_modified: Some(Utc::now()),
            ..entry.file
        };
        files.insert(
            destination.to_string(),
            Entry {
                data: entry.data,
                file: file.clone(),
            },
        );
        Ok(file)
    }

    fn part_size_limits(&self) -> PartSizeLimits {
        PartSizeLimits {
            min_part_size: 1,
            max_part_size: self.config.max_size.unwrap_or(5 * TIB).max(1),
            default_part_size: 5 * MIB,
            max_parts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MultipartStrategy;
    use crate::error::ErrorKind;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = MemoryBackend::new();
        let stored = backend
            .put(
                "test.txt",
                Bytes::from_static(b"hello world"),
                &PutOptions::new().with_content_type("text/plain"),
            )
            .await
            .unwrap();

        assert_eq!(stored.key, "test.txt");
        assert_eq!(stored.size, 11);
        assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
        assert!(stored.etag.is_some());
        assert!(backend.exists("test.txt").await.unwrap());
        assert_eq!(
            backend.get_bytes("test.txt").await.unwrap().as_ref(),
            b"hello world"
        );
        assert_eq!(backend.info("test.txt").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let backend = MemoryBackend::new();
        assert!(backend.get_bytes("nope").await.unwrap_err().is_not_found());
        assert!(backend.delete("nope").await.unwrap_err().is_not_found());
        assert!(backend.info("nope").await.unwrap_err().is_not_found());
        assert!(!backend.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_max_size() {
        let backend = MemoryBackend::with_config(MemoryConfig { max_size: Some(10) });
        backend
            .put("a", Bytes::from_static(b"12345"), &PutOptions::new())
            .await
            .unwrap();
        // Replacing an object only counts its new size
        backend
            .put("a", Bytes::from_static(b"1234567890"), &PutOptions::new())
            .await
            .unwrap();

        let err = backend
            .put("b", Bytes::from_static(b"x"), &PutOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert_eq!(backend.total_size().await, 10);
    }

    #[tokio::test]
    async fn test_list_prefix_and_limit() {
        let backend = MemoryBackend::new();
        for key in ["img/b.png", "img/a.png", "doc/x.txt", "img/c.png"] {
            backend
                .put(key, Bytes::from_static(b"x"), &PutOptions::new())
                .await
                .unwrap();
        }

        let keys: Vec<String> = backend
            .list("img/", ListOptions::default())
            .await
            .unwrap()
            .map(|f| f.unwrap().key)
            .collect()
            .await;
        assert_eq!(keys, vec!["img/a.png", "img/b.png", "img/c.png"]);

        let limited: Vec<_> = backend
            .list("", ListOptions::default().with_limit(2))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let backend = MemoryBackend::new();
        backend
            .put(
                "src.txt",
                Bytes::from_static(b"data"),
                &PutOptions::new().with_content_type("text/plain"),
            )
            .await
            .unwrap();

        let copied = backend.copy("src.txt", "copy.txt").await.unwrap();
        assert_eq!(copied.key, "copy.txt");
        assert_eq!(copied.content_type.as_deref(), Some("text/plain"));
        assert!(backend.exists("src.txt").await.unwrap());

        let moved = backend.rename("src.txt", "moved.txt").await.unwrap();
        assert_eq!(moved.key, "moved.txt");
        assert!(!backend.exists("src.txt").await.unwrap());
        assert_eq!(backend.get_bytes("moved.txt").await.unwrap().as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_url_and_strategy() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.url("a/b.txt", None).await.unwrap(), "memory://a/b.txt");
        assert_eq!(backend.multipart_strategy(), MultipartStrategy::ClientBuffered);
        assert_eq!(backend.part_size_limits().min_part_size, 1);
    }
}
