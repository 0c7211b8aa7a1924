//! Storage facade
//!
//! [`Storage`] is the public entry point: one backend, the multipart engine
//! bound to it, and the retry policy applied to idempotent operations.
//! Single-shot calls go straight to the backend; `put_large` and the
//! explicit multipart calls go through [`MultipartEngine`].
//!
//! # Example
//!
//! ```
//! use polystore::{PutOptions, Storage};
//! use polystore::backend::MemoryBackend;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> polystore::Result<()> {
//! let storage = Storage::new(Arc::new(MemoryBackend::new()));
//! storage.put("notes/today.txt", "hello", &PutOptions::new()).await?;
//! assert_eq!(storage.get_bytes("notes/today.txt").await?.as_ref(), b"hello");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::backend::{
    create_backend, Backend, ByteStream, ListOptions, ListStream, PartTag, PutOptions, StoredFile,
};
use crate::config::StorageConfig;
use crate::core::progress::{ProgressCallback, ProgressStream, TransferOperation};
use crate::core::retry::{with_retry, RetryConfig};
use crate::error::Result;
use crate::multipart::{MultipartEngine, MultipartUpload, PutLargeOptions, UploadSource};

/// Uniform file operations over one backend
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn Backend>,
    engine: MultipartEngine,
    retry: RetryConfig,
}

impl Storage {
    /// Facade over `backend` with the default retry policy and part size
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let retry = RetryConfig::default();
        Self {
            engine: MultipartEngine::new(backend.clone()).with_retry(retry.clone()),
            backend,
            retry,
        }
    }

    /// Build the backend and policies described by `config`
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(&config.backend).await?;
        let retry = config.retry.to_retry_config()?;

        tracing::info!(
            backend = %backend.backend_name(),
            part_size = config.multipart.part_size,
            concurrency = config.multipart.concurrency,
            "Storage ready"
        );

        Ok(Self {
            engine: MultipartEngine::new(backend.clone())
                .with_retry(retry.clone())
                .with_part_size(config.multipart.part_size)
                .with_concurrency(config.multipart.concurrency),
            backend,
            retry,
        })
    }

    /// Replace the retry policy for both single-shot and multipart calls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.engine = self.engine.with_retry(retry.clone());
        self.retry = retry;
        self
    }

    /// Default part size for `put_large`
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.engine = self.engine.with_part_size(part_size);
        self
    }

    /// Default number of parts in flight for `put_large`
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.engine = self.engine.with_concurrency(concurrency);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn engine(&self) -> &MultipartEngine {
        &self.engine
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Store `data` at `key` in one request
    pub async fn put(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: &PutOptions,
    ) -> Result<StoredFile> {
        let data = data.into();
        with_retry(&self.retry, || self.backend.put(key, data.clone(), options)).await
    }

    /// Store a stream, reporting bytes as they are read from it
    ///
    /// The stream goes through `put_large`, so it may become a multipart
    /// upload. Pass `size_hint` when the length is known to get percentages.
    pub async fn put_with_progress(
        &self,
        key: &str,
        stream: ByteStream,
        size_hint: Option<u64>,
        options: &PutOptions,
        callback: ProgressCallback,
    ) -> Result<StoredFile> {
        let reported: ByteStream = Box::pin(ProgressStream::new(
            stream,
            key,
            TransferOperation::Upload,
            size_hint,
            Some(callback),
        ));

        let mut large = PutLargeOptions::new().with_metadata(options.metadata.clone());
        large.content_type = options.content_type.clone();
        self.engine
            .put_large(key, UploadSource::stream(reported, size_hint), large)
            .await
    }

    /// Store a payload of any size, splitting it into parts when needed
    pub async fn put_large(
        &self,
        key: &str,
        source: impl Into<UploadSource> + Send,
        options: PutLargeOptions,
    ) -> Result<StoredFile> {
        self.engine.put_large(key, source, options).await
    }

    /// Open `key` as a byte stream
    ///
    /// Opening is retried; failures while reading the stream are not.
    pub async fn get(&self, key: &str) -> Result<ByteStream> {
        with_retry(&self.retry, || self.backend.get(key)).await
    }

    /// Open `key` as a byte stream that reports each chunk to `callback`
    pub async fn get_with_progress(
        &self,
        key: &str,
        callback: ProgressCallback,
    ) -> Result<ByteStream> {
        let info = self.info(key).await?;
        let stream = self.get(key).await?;
        Ok(Box::pin(ProgressStream::new(
            stream,
            key,
            TransferOperation::Download,
            Some(info.size),
            Some(callback),
        )))
    }

    /// Read all of `key` into memory
    pub async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        with_retry(&self.retry, || self.backend.get_bytes(key)).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        with_retry(&self.retry, || self.backend.delete(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        with_retry(&self.retry, || self.backend.exists(key)).await
    }

    /// Objects under `prefix`, at most `options.limit` of them
    pub async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
        with_retry(&self.retry, || self.backend.list(prefix, options.clone())).await
    }

    /// Access URL for `key`; remote backends sign it for `expires_in`
    pub async fn url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
        with_retry(&self.retry, || self.backend.url(key, expires_in)).await
    }

    pub async fn info(&self, key: &str) -> Result<StoredFile> {
        with_retry(&self.retry, || self.backend.info(key)).await
    }

    /// Copy within the backend, server-side where supported
    pub async fn copy(&self, source: &str, destination: &str) -> Result<StoredFile> {
        with_retry(&self.retry, || self.backend.copy(source, destination)).await
    }

    /// Move `source` to `destination`
    ///
    /// Not retried: a repeated attempt after a partial copy-then-delete
    /// could fail on the missing source or repeat the copy.
    #[tracing::instrument(skip(self), fields(backend = %self.backend.backend_name()))]
    pub async fn rename(&self, source: &str, destination: &str) -> Result<StoredFile> {
        self.backend.rename(source, destination).await
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }

    /// Open a multipart session; see [`MultipartEngine::start_multipart_upload`]
    pub async fn start_multipart_upload(
        &self,
        key: &str,
        part_size: Option<u64>,
        options: &PutOptions,
    ) -> Result<MultipartUpload> {
        self.engine
            .start_multipart_upload(key, part_size, options)
            .await
    }

    pub async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: impl Into<Bytes>,
    ) -> Result<PartTag> {
        self.engine
            .upload_part(upload, part_number, data.into())
            .await
    }

    pub async fn complete_multipart_upload(&self, upload: &MultipartUpload) -> Result<StoredFile> {
        self.engine.complete_multipart_upload(upload).await
    }

    pub async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<()> {
        self.engine.abort_multipart_upload(upload).await
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend.backend_name())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendConfig, MemoryBackend};
    use crate::error::{ErrorKind, StorageError};
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn memory_storage() -> Storage {
        Storage::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let storage = memory_storage();
        let stored = storage
            .put("a/b.txt", Bytes::from_static(b"payload"), &PutOptions::new())
            .await
            .unwrap();

        assert_eq!(stored.key, "a/b.txt");
        assert_eq!(stored.size, 7);
        assert_eq!(storage.get_bytes(&stored.key).await.unwrap().as_ref(), b"payload");
        assert!(storage.exists("a/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_rename_delete() {
        let storage = memory_storage();
        storage.put("src", "data", &PutOptions::new()).await.unwrap();

        storage.copy("src", "copy").await.unwrap();
        assert!(storage.exists("src").await.unwrap());

        let moved = storage.rename("copy", "moved").await.unwrap();
        assert_eq!(moved.key, "moved");
        assert!(!storage.exists("copy").await.unwrap());

        storage.delete("src").await.unwrap();
        assert!(!storage.exists("src").await.unwrap());
        assert_eq!(storage.get_bytes("moved").await.unwrap().as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_list_with_limit() {
        let storage = memory_storage();
        for key in ["img/c.png", "img/a.png", "img/b.png", "doc/x.txt"] {
            storage.put(key, "x", &PutOptions::new()).await.unwrap();
        }

        let files: Vec<StoredFile> = storage
            .list("img/", ListOptions::default().with_limit(2))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let keys: Vec<_> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["img/a.png", "img/b.png"]);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_retried() {
        let storage = memory_storage();
        let err = storage.get_bytes("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_get_with_progress_reports_total() {
        let storage = memory_storage();
        storage.put("f", vec![7u8; 64], &PutOptions::new()).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |info: &crate::ProgressInfo| {
            sink.lock().unwrap().push((info.bytes_transferred, info.total_bytes, info.operation));
        });

        let stream = storage.get_with_progress("f", callback).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 64);

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.0, 64);
        assert_eq!(last.1, Some(64));
        assert_eq!(last.2, TransferOperation::Download);
    }

    #[tokio::test]
    async fn test_put_with_progress_counts_stream_bytes() {
        let storage = memory_storage().with_part_size(4);
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
            Ok(Bytes::from_static(b"hi")),
        ];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |info: &crate::ProgressInfo| {
            sink.lock().unwrap().push(info.bytes_transferred);
        });

        let stored = storage
            .put_with_progress("s.bin", stream, None, &PutOptions::new(), callback)
            .await
            .unwrap();

        assert_eq!(stored.size, 9);
        assert_eq!(*seen.lock().unwrap(), vec![3, 7, 9]);
        assert_eq!(storage.get_bytes("s.bin").await.unwrap().as_ref(), b"abcdefghi");
    }

    #[tokio::test]
    async fn test_explicit_multipart_through_facade() {
        let storage = memory_storage();
        let upload = storage
            .start_multipart_upload("f.bin", Some(5), &PutOptions::new())
            .await
            .unwrap();
        storage.upload_part(&upload, 1, &b"AAAAA"[..]).await.unwrap();
        storage.upload_part(&upload, 2, &b"BB"[..]).await.unwrap();
        let stored = storage.complete_multipart_upload(&upload).await.unwrap();

        assert_eq!(stored.size, 7);
        assert_eq!(storage.get_bytes("f.bin").await.unwrap().as_ref(), b"AAAAABB");
    }

    #[tokio::test]
    async fn test_from_config_filesystem() {
        let dir = TempDir::new().unwrap();
        let mut config = StorageConfig::for_backend(BackendConfig::filesystem(dir.path()));
        config.multipart.concurrency = 2;

        let storage = Storage::from_config(&config).await.unwrap();
        assert_eq!(storage.backend_name(), "filesystem");
        assert_eq!(storage.retry_config().max_retries, 3);

        storage.put("x/y.txt", "fs", &PutOptions::new()).await.unwrap();
        assert!(dir.path().join("x/y.txt").is_file());
        storage.close().await.unwrap();
    }

    /// Fails `put` with a connection error a fixed number of times
    struct FlakyPut {
        inner: MemoryBackend,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Backend for FlakyPut {
        fn backend_name(&self) -> &str {
            "flaky"
        }

        async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> Result<StoredFile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StorageError::connection("flaky", "reset by peer"));
            }
            self.inner.put(key, data, options).await
        }

        async fn get(&self, key: &str) -> Result<ByteStream> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn list(&self, prefix: &str, options: ListOptions) -> Result<ListStream> {
            self.inner.list(prefix, options).await
        }

        async fn url(&self, key: &str, expires_in: Option<Duration>) -> Result<String> {
            self.inner.url(key, expires_in).await
        }

        async fn info(&self, key: &str) -> Result<StoredFile> {
            self.inner.info(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_retries_connection_failures() {
        let backend = Arc::new(FlakyPut {
            inner: MemoryBackend::new(),
            failures: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let storage = Storage::new(backend.clone()).with_retry(RetryConfig::default().with_jitter(false));

        storage.put("k", "v", &PutOptions::new()).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_gives_up_after_max_retries() {
        let backend = Arc::new(FlakyPut {
            inner: MemoryBackend::new(),
            failures: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let storage =
            Storage::new(backend.clone()).with_retry(RetryConfig::default().with_max_retries(1));

        let err = storage.put("k", "v", &PutOptions::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
