//! Local filesystem backend implementation
//!
//! Stores each object as a file below a root directory. Keys are sanitized
//! so they can never escape the root.
//!
//! Multipart uploads use the staged-blocks strategy: each part is written to
//! `<root>/.multipart/<upload_id>/<part_number>` and completion concatenates
//! the staged parts into a temporary file that is renamed into place, so a
//! partially assembled object is never visible.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::types::{
    ByteStream, ListOptions, ListStream, MultipartStrategy, PartSizeLimits, PartTag, PutOptions,
    StoredFile, GIB, MIB,
};
use super::Backend;
use crate::error::{Result, StorageError};
use crate::multipart::MultipartUpload;

/// Directory below the root holding staged parts and in-progress writes
const STAGING_DIR: &str = ".multipart";

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for filesystem storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Base directory for file storage
    pub path: PathBuf,

    /// Base URL used by `url()` (e.g. "https://cdn.example.com/uploads")
    #[serde(default)]
    pub base_url: Option<String>,

    /// Create the root and parent directories as needed
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,

    /// Unix permission bits applied to written files
    #[serde(default = "default_permissions")]
    pub permissions: u32,
}

fn default_create_dirs() -> bool {
    true
}

fn default_permissions() -> u32 {
    0o644
}

impl FileSystemConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base_url: None,
            create_dirs: default_create_dirs(),
            permissions: default_permissions(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Local filesystem backend
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    config: FileSystemConfig,
}

impl FileSystemBackend {
    /// Create a backend rooted at `config.path`
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Configuration` if the root does not exist and
    /// `create_dirs` is off, or cannot be created.
    pub fn new(config: FileSystemConfig) -> Result<Self> {
        if config.create_dirs {
            std::fs::create_dir_all(&config.path).map_err(|e| {
                StorageError::Configuration(format!(
                    "cannot create storage path {}: {}",
                    config.path.display(),
                    e
                ))
            })?;
        } else if !config.path.is_dir() {
            return Err(StorageError::Configuration(format!(
                "storage path does not exist: {}",
                config.path.display()
            )));
        }
        Ok(Self { config })
    }

    pub fn root(&self) -> &Path {
        &self.config.path
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Ok(self.config.path.join(checked_key(key)?))
    }

    fn staging_root(&self) -> PathBuf {
        self.config.path.join(STAGING_DIR)
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.staging_root().join(upload_id)
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if self.config.create_dirs {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    async fn apply_permissions(&self, path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(self.config.permissions);
            fs::set_permissions(path, permissions).await?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }

    /// Move a fully written temporary file to its final location
    async fn publish(&self, temp: &Path, key: &str) -> Result<StoredFile> {
        let target = self.resolve(key)?;
        self.ensure_parent(&target)
            .await
            .map_err(|e| with_key(e, key))?;
        self.apply_permissions(temp).await?;
        fs::rename(temp, &target)
            .await
            .map_err(|e| map_io(e, key))?;
        self.stat(key, &target).await
    }

    async fn stat(&self, key: &str, path: &Path) -> Result<StoredFile> {
        let meta = fs::metadata(path).await.map_err(|e| map_io(e, key))?;
        if !meta.is_file() {
            return Err(StorageError::not_found(key));
        }
        Ok(stored_file(&sanitize_key(key), &meta))
    }

    fn temp_path(&self) -> PathBuf {
        self.staging_root()
            .join(format!("write-{}.tmp", uuid::Uuid::new_v4()))
    }
}

/// Resolve `.`/`..`, normalise separators, and strip leading slashes
pub(crate) fn sanitize_key(key: &str) -> String {
    let key = key.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in key.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Sanitized key, refusing keys that would land in the staging directory
fn checked_key(key: &str) -> Result<String> {
    let clean = sanitize_key(key);
    if clean.split('/').next() == Some(STAGING_DIR) {
        return Err(StorageError::InvalidArgument(format!(
            "key {:?} is inside the reserved {} directory",
            key, STAGING_DIR
        )));
    }
    Ok(clean)
}

fn part_file_name(part_number: u32) -> String {
    format!("{:010}", part_number)
}

fn guess_content_type(key: &str) -> Option<String> {
    mime_guess::from_path(key).first().map(|m| m.to_string())
}

fn stored_file(key: &str, meta: &std::fs::Metadata) -> StoredFile {
    let file = StoredFile::new(key, meta.len()).with_content_type(guess_content_type(key));
    match meta.modified() {
        Ok(modified) => file.with_last_modified(DateTime::<Utc>::from(modified)),
        Err(_) => file,
    }
}

/// Attach the key to key-less I/O errors
fn map_io(err: io::Error, key: &str) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::not_found(key),
        io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            key: key.to_string(),
            message: err.to_string(),
        },
        _ => StorageError::from(err),
    }
}

fn with_key(err: StorageError, key: &str) -> StorageError {
    match err {
        StorageError::NotFound { key: k } if k.is_empty() => StorageError::not_found(key),
        StorageError::PermissionDenied { key: k, message } if k.is_empty() => {
            StorageError::PermissionDenied {
                key: key.to_string(),
                message,
            }
        }
        other => other,
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl Backend for FileSystemBackend {
    fn backend_name(&self) -> &str {
        "filesystem"
    }

    #[tracing::instrument(skip(self, data, options), fields(backend = "filesystem", key = %key, size = data.len()))]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile> {
        self.resolve(key)?;
        fs::create_dir_all(self.staging_root()).await?;
        let temp = self.temp_path();

        if let Err(e) = write_file(&temp, &data).await {
            let _ = fs::remove_file(&temp).await;
            return Err(with_key(e, key));
        }
        let stored = match self.publish(&temp, key).await {
            Ok(stored) => stored,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        Ok(StoredFile {
            content_type: options.content_type.clone().or(stored.content_type),
            ..stored
        })
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let path = self.resolve(key)?;
        let file = fs::File::open(&path).await.map_err(|e| map_io(e, key))?;
        if !file.metadata().await?.is_file() {
            return Err(StorageError::not_found(key));
        }

        let stream = ReaderStream::with_capacity(file, READ_CHUNK_SIZE).map_err(StorageError::from);
        Ok(Box::pin(stream))
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        let path = self.resolve(key)?;
        let data = fs::read(&path).await.map_err(|e| map_io(e, key))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        fs::remove_file(self.resolve(key)?)
            .await
            .map_err(|e| map_io(e, key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.resolve(key)?).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(e, key)),
        }
    }

    #[tracing::instrument(skip(self, options), fields(backend = "filesystem", prefix = %prefix))]
    async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
        let root = self.config.path.clone();
        let staging = self.staging_root();
        let prefix = prefix.to_string();

        // Walk only the directory that can contain matches
        let search_dir = match prefix.rfind('/') {
            Some(idx) => root.join(sanitize_key(&prefix[..idx])),
            None => root.clone(),
        };

        let files = tokio::task::spawn_blocking(move || -> Result<Vec<StoredFile>> {
            let mut files = Vec::new();
            if !search_dir.is_dir() {
                return Ok(files);
            }

            let walker = walkdir::WalkDir::new(&search_dir)
                .into_iter()
                .filter_entry(move |e| e.path() != staging.as_path());

            for entry in walker {
                let entry = entry.map_err(|e| StorageError::from(io::Error::other(e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if !key.starts_with(&prefix) || key.split('/').next() == Some(STAGING_DIR) {
                    continue;
                }
                let meta = entry
                    .metadata()
                    .map_err(|e| StorageError::from(io::Error::other(e)))?;
                files.push(stored_file(&key, &meta));
            }

            files.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(files)
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))??;

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(stream::iter(files.into_iter().take(limit).map(Ok)).boxed())
    }

    async fn url(&self, key: &str, _expires_in: Option<Duration>) -> Result<String> {
        let key = checked_key(key)?;
        if let Some(base_url) = &self.config.base_url {
            return Ok(format!("{}/{}", base_url.trim_end_matches('/'), key));
        }

        let path = self.config.path.join(&key);
        let path = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        url::Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| {
                StorageError::Configuration(format!(
                    "cannot build file URL for {}",
                    path.display()
                ))
            })
    }

    async fn info(&self, key: &str) -> Result<StoredFile> {
        self.stat(key, &self.resolve(key)?).await
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let source_path = self.resolve(source)?;
        if !fs::metadata(&source_path)
            .await
            .map_err(|e| map_io(e, source))?
            .is_file()
        {
            return Err(StorageError::not_found(source));
        }

        fs::create_dir_all(self.staging_root()).await?;
        let temp = self.temp_path();
        if let Err(e) = fs::copy(&source_path, &temp).await {
            let _ = fs::remove_file(&temp).await;
            return Err(map_io(e, source));
        }
        match self.publish(&temp, destination).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                Err(e)
            }
        }
    }

    async fn rename(&self, source: &str, destination: &str) -> Result<StoredFile> {
        let source_path = self.resolve(source)?;
        let target = self.resolve(destination)?;
        if !fs::metadata(&source_path)
            .await
            .map_err(|e| map_io(e, source))?
            .is_file()
        {
            return Err(StorageError::not_found(source));
        }

        self.ensure_parent(&target)
            .await
            .map_err(|e| with_key(e, destination))?;
        fs::rename(&source_path, &target)
            .await
            .map_err(|e| map_io(e, source))?;
        self.apply_permissions(&target).await?;
        self.stat(destination, &target).await
    }

    fn multipart_strategy(&self) -> MultipartStrategy {
        MultipartStrategy::StagedBlocks
    }

    fn part_size_limits(&self) -> PartSizeLimits {
        PartSizeLimits {
            min_part_size: 1,
            max_part_size: 5 * GIB,
            default_part_size: 5 * MIB,
            max_parts: None,
        }
    }

    async fn begin_multipart(
        &self,
        key: &str,
        part_size: u64,
        options: &PutOptions,
    ) -> Result<MultipartUpload> {
        self.resolve(key)?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        fs::create_dir_all(self.staging_dir(&upload_id)).await?;

        tracing::debug!(key = %key, upload_id = %upload_id, "Staging directory created");
        Ok(MultipartUpload::new(
            upload_id,
            key,
            part_size,
            options.content_type.clone(),
            options.metadata.clone(),
        ))
    }

    #[tracing::instrument(skip(self, upload, data), fields(backend = "filesystem", upload_id = %upload.upload_id(), size = data.len()))]
    async fn upload_part_raw(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartTag> {
        let block = part_file_name(part_number);
        let dir = self.staging_dir(upload.upload_id());
        if !fs::try_exists(&dir).await? {
            return Err(StorageError::InvalidUploadState {
                upload_id: upload.upload_id().to_string(),
                operation: "upload part",
                state: "missing staging directory".to_string(),
            });
        }

        // Staged under a temporary name so a torn write never looks complete
        let temp = dir.join(format!("{}.partial", block));
        write_file(&temp, &data).await?;
        fs::rename(&temp, dir.join(&block)).await?;
        Ok(PartTag::new(block))
    }

    #[tracing::instrument(skip(self, upload, parts), fields(backend = "filesystem", key = %upload.key(), parts = parts.len()))]
    async fn finalize_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[(u32, PartTag)],
    ) -> Result<StoredFile> {
        let dir = self.staging_dir(upload.upload_id());
        let assembled = dir.join("assembled");

        let mut out = fs::File::create(&assembled).await?;
        for (_, tag) in parts {
            let mut block = fs::File::open(dir.join(tag.as_str())).await.map_err(|e| {
                StorageError::InvalidUploadState {
                    upload_id: upload.upload_id().to_string(),
                    operation: "complete",
                    state: format!("missing staged block {}: {}", tag, e),
                }
            })?;
            tokio::io::copy(&mut block, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        let stored = self.publish(&assembled, upload.key()).await?;
        if let Err(e) = fs::remove_dir_all(&dir).await {
            tracing::warn!(upload_id = %upload.upload_id(), error = %e, "Failed to remove staging directory");
        }

        Ok(StoredFile {
            content_type: upload
                .content_type()
                .map(str::to_string)
                .or(stored.content_type),
            ..stored
        })
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<()> {
        match fs::remove_dir_all(self.staging_dir(upload.upload_id())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend(temp: &TempDir) -> FileSystemBackend {
        FileSystemBackend::new(FileSystemConfig::new(temp.path())).unwrap()
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("a/b.txt"), "a/b.txt");
        assert_eq!(sanitize_key("/a/b.txt"), "a/b.txt");
        assert_eq!(sanitize_key("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_key("a/../b/./c.txt"), "b/c.txt");
        assert_eq!(sanitize_key("a\\b.txt"), "a/b.txt");
    }

    #[tokio::test]
    async fn test_staging_directory_keys_rejected() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);

        for key in [".multipart", ".multipart/x/1", "/.multipart/leak.txt", "a/../.multipart/b"] {
            let err = backend
                .put(key, Bytes::from_static(b"x"), &PutOptions::new())
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidArgument(_)), "{}: {:?}", key, err);
        }
        assert!(backend.begin_multipart(".multipart/k", 5, &PutOptions::new()).await.is_err());
        assert!(backend.rename("missing", ".multipart/k").await.is_err());

        // Only the first segment is reserved
        backend
            .put("docs/.multipart", Bytes::from_static(b"ok"), &PutOptions::new())
            .await
            .unwrap();
        assert!(backend.exists("docs/.multipart").await.unwrap());

        let listed: Vec<StoredFile> = backend
            .list("", ListOptions::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<_> = listed.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/.multipart"]);
    }

    #[test]
    fn test_missing_root_without_create_dirs() {
        let temp = TempDir::new().unwrap();
        let mut config = FileSystemConfig::new(temp.path().join("absent"));
        config.create_dirs = false;
        let err = FileSystemBackend::new(config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);

        let stored = backend
            .put("docs/readme.txt", Bytes::from("test data"), &PutOptions::new())
            .await
            .unwrap();
        assert_eq!(stored.key, "docs/readme.txt");
        assert_eq!(stored.size, 9);
        assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
        assert!(temp.path().join("docs/readme.txt").exists());

        let mut stream = backend.get("docs/readme.txt").await.unwrap();
        let mut result = Vec::new();
        while let Some(chunk) = stream.next().await {
            result.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(result, b"test data");
    }

    #[tokio::test]
    async fn test_traversal_stays_inside_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let backend = FileSystemBackend::new(FileSystemConfig::new(&root)).unwrap();

        backend
            .put("../escape.txt", Bytes::from("x"), &PutOptions::new())
            .await
            .unwrap();
        assert!(root.join("escape.txt").exists());
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions_applied() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let backend = FileSystemBackend::new(
            FileSystemConfig::new(temp.path()).with_permissions(0o600),
        )
        .unwrap();
        backend
            .put("secret.bin", Bytes::from("x"), &PutOptions::new())
            .await
            .unwrap();

        let mode = std::fs::metadata(temp.path().join("secret.bin"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_list_skips_staging_area() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        for key in ["img/b.png", "img/a.png", "imgx.png", "doc/x.txt"] {
            backend.put(key, Bytes::from("x"), &PutOptions::new()).await.unwrap();
        }
        let upload = backend
            .begin_multipart("pending.bin", 5, &PutOptions::new())
            .await
            .unwrap();
        backend
            .upload_part_raw(&upload, 1, Bytes::from("AAAAA"))
            .await
            .unwrap();

        let all: Vec<String> = backend
            .list("", ListOptions::default())
            .await
            .unwrap()
            .map(|f| f.unwrap().key)
            .collect()
            .await;
        assert_eq!(all, vec!["doc/x.txt", "img/a.png", "img/b.png", "imgx.png"]);

        let images: Vec<String> = backend
            .list("img/", ListOptions::default().with_limit(1))
            .await
            .unwrap()
            .map(|f| f.unwrap().key)
            .collect()
            .await;
        assert_eq!(images, vec!["img/a.png"]);
    }

    #[tokio::test]
    async fn test_url_forms() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        let url = backend.url("a/b.txt", None).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/a/b.txt"));

        let backend = FileSystemBackend::new(
            FileSystemConfig::new(temp.path()).with_base_url("https://cdn.example.com/uploads/"),
        )
        .unwrap();
        assert_eq!(
            backend.url("a/b.txt", None).await.unwrap(),
            "https://cdn.example.com/uploads/a/b.txt"
        );
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        backend
            .put("source.txt", Bytes::from("payload"), &PutOptions::new())
            .await
            .unwrap();

        let copied = backend.copy("source.txt", "nested/copy.txt").await.unwrap();
        assert_eq!(copied.size, 7);
        assert!(backend.exists("source.txt").await.unwrap());

        let moved = backend.rename("source.txt", "dest.txt").await.unwrap();
        assert_eq!(moved.key, "dest.txt");
        assert!(!backend.exists("source.txt").await.unwrap());
        assert_eq!(backend.get_bytes("dest.txt").await.unwrap().as_ref(), b"payload");

        assert!(backend
            .rename("source.txt", "again.txt")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_staged_blocks_commit_in_part_order() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        let upload = backend
            .begin_multipart("f.bin", 5, &PutOptions::new())
            .await
            .unwrap();

        let second = backend
            .upload_part_raw(&upload, 2, Bytes::from("BB"))
            .await
            .unwrap();
        let first = backend
            .upload_part_raw(&upload, 1, Bytes::from("AAAAA"))
            .await
            .unwrap();
        assert!(!backend.exists("f.bin").await.unwrap());

        let stored = backend
            .finalize_multipart(&upload, &[(1, first), (2, second)])
            .await
            .unwrap();
        assert_eq!(stored.size, 7);
        assert_eq!(backend.get_bytes("f.bin").await.unwrap().as_ref(), b"AAAAABB");
        assert!(!temp.path().join(STAGING_DIR).join(upload.upload_id()).exists());
    }

    #[tokio::test]
    async fn test_abort_removes_staged_blocks() {
        let temp = TempDir::new().unwrap();
        let backend = backend(&temp);
        let upload = backend
            .begin_multipart("f.bin", 5, &PutOptions::new())
            .await
            .unwrap();
        backend
            .upload_part_raw(&upload, 1, Bytes::from("AAAAA"))
            .await
            .unwrap();

        backend.abort_multipart(&upload).await.unwrap();
        backend.abort_multipart(&upload).await.unwrap();
        assert!(!temp.path().join(STAGING_DIR).join(upload.upload_id()).exists());
        assert!(!backend.exists("f.bin").await.unwrap());
    }
}
