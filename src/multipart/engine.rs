//! Multipart upload engine
//!
//! [`MultipartEngine`] drives a backend's four multipart primitives through
//! the session state machine in [`super::session`]. It decides between a
//! direct `put` and a multipart upload, bounds part-upload concurrency,
//! retries part transfers, reports progress, and always attempts an abort
//! when an upload cannot finish.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use super::session::{AbortAction, MultipartUpload, PartReservation};
use crate::backend::{Backend, ByteStream, MultipartStrategy, PartTag, PutOptions, StoredFile};
use crate::core::progress::{ProgressCallback, ProgressTracker, TransferOperation};
use crate::core::retry::{with_retry, with_retry_cancellable, RetryConfig};
use crate::error::{Result, StorageError};

/// Part size used by `put_large` when neither caller nor engine config picks one
pub const DEFAULT_PART_SIZE: u64 = 10 * 1024 * 1024;

/// Simultaneous part uploads per `put_large` call
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Payload for [`MultipartEngine::put_large`]
pub enum UploadSource {
    /// Fully materialised payload
    Bytes(Bytes),
    /// Caller-supplied stream, optionally with its expected length
    Stream {
        stream: ByteStream,
        size_hint: Option<u64>,
    },
}

impl UploadSource {
    pub fn stream(stream: ByteStream, size_hint: Option<u64>) -> Self {
        UploadSource::Stream { stream, size_hint }
    }

    /// Length if known before reading
    pub fn known_len(&self) -> Option<u64> {
        match self {
            UploadSource::Bytes(data) => Some(data.len() as u64),
            UploadSource::Stream { size_hint, .. } => *size_hint,
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        UploadSource::Bytes(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(data))
    }
}

impl From<&'static [u8]> for UploadSource {
    fn from(data: &'static [u8]) -> Self {
        UploadSource::Bytes(Bytes::from_static(data))
    }
}

/// Per-call options for [`MultipartEngine::put_large`]
#[derive(Clone, Default)]
pub struct PutLargeOptions {
    pub part_size: Option<u64>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub progress: Option<ProgressCallback>,
    pub concurrency: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

impl PutLargeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Callback invoked after each part lands
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Token that cancels the upload; the session is aborted before returning
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn put_options(&self) -> PutOptions {
        PutOptions {
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl std::fmt::Debug for PutLargeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutLargeOptions")
            .field("part_size", &self.part_size)
            .field("content_type", &self.content_type)
            .field("metadata", &self.metadata)
            .field("progress", &self.progress.is_some())
            .field("concurrency", &self.concurrency)
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// Drives multipart uploads against one backend
#[derive(Clone)]
pub struct MultipartEngine {
    backend: Arc<dyn Backend>,
    retry: RetryConfig,
    part_size: u64,
    concurrency: usize,
}

impl MultipartEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Policy applied to part transfers and finalize
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Open a multipart session for `key`
    ///
    /// A part size below the backend minimum is raised to it; one above the
    /// maximum is a configuration error. `begin` is not retried because a
    /// repeated begin can leave an orphaned server-side upload.
    #[tracing::instrument(skip(self, options), fields(backend = %self.backend.backend_name(), key = %key))]
    pub async fn start_multipart_upload(
        &self,
        key: &str,
        part_size: Option<u64>,
        options: &PutOptions,
    ) -> Result<MultipartUpload> {
        let limits = self.backend.part_size_limits();
        let effective = limits.resolve(part_size)?;
        if let Some(requested) = part_size {
            if requested != effective {
                tracing::debug!(requested, effective, "Part size raised to backend minimum");
            }
        }

        let upload = self.backend.begin_multipart(key, effective, options).await?;
        tracing::debug!(
            upload_id = %upload.upload_id(),
            part_size = effective,
            strategy = %self.backend.multipart_strategy(),
            "Multipart upload started"
        );
        Ok(upload)
    }

    /// Upload one part of an open session
    ///
    /// Part numbers start at 1 and must arrive in order. Sending a completed
    /// part again with identical bytes returns its recorded tag without a
    /// transfer; different bytes are rejected.
    pub async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartTag> {
        let max_parts = self.backend.part_size_limits().max_parts;
        match upload.reserve_part(part_number, &data, max_parts)? {
            PartReservation::AlreadyCompleted(tag) => {
                tracing::debug!(upload_id = %upload.upload_id(), part_number, "Part already uploaded");
                Ok(tag)
            }
            PartReservation::Upload => self.send_part(upload, part_number, data, None).await,
        }
    }

    /// Publish the object from every uploaded part
    ///
    /// On failure the session becomes `Failed` and only abort is valid.
    #[tracing::instrument(skip(self, upload), fields(backend = %self.backend.backend_name(), key = %upload.key(), upload_id = %upload.upload_id()))]
    pub async fn complete_multipart_upload(&self, upload: &MultipartUpload) -> Result<StoredFile> {
        self.complete_inner(upload, None).await
    }

    /// Release a session; safe to call repeatedly and after a failed complete
    ///
    /// Aborting a finalized session is a no-op.
    #[tracing::instrument(skip(self, upload), fields(backend = %self.backend.backend_name(), key = %upload.key(), upload_id = %upload.upload_id()))]
    pub async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<()> {
        abort_session(self.backend.as_ref(), upload).await
    }

    /// Store a payload of any size
    ///
    /// Payloads whose length is known and no larger than the effective part
    /// size go through a single `put`. Larger ones are split into parts and
    /// uploaded with bounded concurrency. If anything fails or the upload is
    /// cancelled, the session is aborted before the original error is
    /// returned.
    #[tracing::instrument(skip(self, source, options), fields(backend = %self.backend.backend_name(), key = %key))]
    pub async fn put_large(
        &self,
        key: &str,
        source: impl Into<UploadSource> + Send,
        options: PutLargeOptions,
    ) -> Result<StoredFile> {
        let source = source.into();
        let limits = self.backend.part_size_limits();
        // Only an explicit request may exceed the backend maximum and fail
        let requested = options
            .part_size
            .unwrap_or_else(|| self.part_size.min(limits.max_part_size));
        let part_size = limits.resolve(Some(requested))?;
        let cancel = options.cancel.clone().unwrap_or_default();
        let put_options = options.put_options();

        let total_bytes = source.known_len();
        let tracker = ProgressTracker::new(
            key,
            TransferOperation::Upload,
            total_bytes,
            options.progress.clone(),
        );

        let mut reader = PartReader::new(source, part_size);
        let whole = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            whole = reader.read_whole_if_within(part_size) => whole?,
        };

        if let Some(data) = whole {
            return self
                .put_direct(key, data, &put_options, &tracker, &cancel)
                .await;
        }

        // A known length is checked against the part-count limit before any
        // transfer starts
        let part_size = match reader.exact_len() {
            Some(total) => {
                let (fitted, parts) = limits.fit(total, part_size)?;
                if fitted != part_size {
                    tracing::debug!(
                        requested = part_size,
                        part_size = fitted,
                        parts,
                        "Part size raised to stay within the backend part limit"
                    );
                }
                fitted
            }
            None => part_size,
        };

        let mut upload = self
            .start_multipart_upload(key, Some(part_size), &put_options)
            .await?;
        // Backends only ever raise the part size, so the count still fits
        let total_parts = reader
            .exact_len()
            .and_then(|total| u32::try_from(total.div_ceil(upload.part_size())).ok());
        upload.set_total_parts(total_parts);
        // The backend may have raised the part size again
        reader.set_part_size(upload.part_size());

        let upload = Arc::new(upload);
        let mut guard = AbortOnDrop::new(self.backend.clone(), upload.clone());
        let concurrency = options.concurrency.unwrap_or(self.concurrency).max(1);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            result = self.drive(&upload, reader, concurrency, &tracker, &cancel) => result,
        };
        guard.disarm();

        match outcome {
            Ok(stored) => {
                tracing::info!(
                    upload_id = %upload.upload_id(),
                    size = stored.size,
                    "Multipart upload completed"
                );
                Ok(stored)
            }
            Err(err) => {
                tracing::warn!(upload_id = %upload.upload_id(), error = %err, "Multipart upload failed, aborting");
                match self.abort_multipart_upload(&upload).await {
                    Ok(()) => Err(err),
                    Err(cleanup) => {
                        tracing::warn!(
                            upload_id = %upload.upload_id(),
                            error = %cleanup,
                            "Abort after failed upload also failed"
                        );
                        Err(err.with_cleanup_failure(cleanup))
                    }
                }
            }
        }
    }

    async fn put_direct(
        &self,
        key: &str,
        data: Bytes,
        options: &PutOptions,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<StoredFile> {
        let size = data.len() as u64;
        tracing::debug!(size, "Payload fits in one part, using direct put");

        let stored = with_retry_cancellable(&self.retry, cancel, || {
            self.backend.put(key, data.clone(), options)
        })
        .await?;
        tracker.advance(size);
        Ok(stored)
    }

    /// Upload every part then complete
    async fn drive(
        &self,
        upload: &MultipartUpload,
        reader: PartReader,
        concurrency: usize,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<StoredFile> {
        let max_parts = self.backend.part_size_limits().max_parts;

        // Parts are read and reserved in order as the buffer pulls them, so
        // numbering never depends on which transfer finishes first
        let parts = stream::try_unfold((reader, 1u32), |(mut reader, number)| async move {
            let part = reader.next_part().await?;
            Ok::<_, StorageError>(part.map(|data| ((number, data), (reader, number + 1))))
        })
        .and_then(|(number, data)| async move {
            let reservation = upload.reserve_part(number, &data, max_parts)?;
            Ok::<_, StorageError>((number, data, reservation))
        });

        let mut transfers = std::pin::pin!(parts
            .map_ok(|(number, data, reservation)| async move {
                let size = data.len() as u64;
                match reservation {
                    PartReservation::AlreadyCompleted(_) => Ok(size),
                    PartReservation::Upload => self
                        .send_part(upload, number, data, Some(cancel))
                        .await
                        .map(|_| size),
                }
            })
            .try_buffer_unordered(concurrency));

        while let Some(size) = transfers.try_next().await? {
            tracker.advance(size);
        }

        self.complete_inner(upload, Some(cancel)).await
    }

    async fn send_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        data: Bytes,
        cancel: Option<&CancellationToken>,
    ) -> Result<PartTag> {
        let attempt = || self.backend.upload_part_raw(upload, part_number, data.clone());

        // Local buffering cannot fail transiently
        let result = match self.backend.multipart_strategy() {
            MultipartStrategy::ClientBuffered => attempt().await,
            _ => match cancel {
                Some(token) => with_retry_cancellable(&self.retry, token, attempt).await,
                None => with_retry(&self.retry, attempt).await,
            },
        };

        match result {
            Ok(tag) => {
                tracing::trace!(upload_id = %upload.upload_id(), part_number, tag = %tag, "Part uploaded");
                upload.complete_part(part_number, tag.clone());
                Ok(tag)
            }
            Err(err) => {
                upload.fail_part(part_number);
                Err(err)
            }
        }
    }

    async fn complete_inner(
        &self,
        upload: &MultipartUpload,
        cancel: Option<&CancellationToken>,
    ) -> Result<StoredFile> {
        let min_part_size = self.backend.part_size_limits().min_part_size;
        let parts = upload.begin_complete(min_part_size)?;

        let finalize = || self.backend.finalize_multipart(upload, &parts);
        let result = match cancel {
            Some(token) => with_retry_cancellable(&self.retry, token, finalize).await,
            None => with_retry(&self.retry, finalize).await,
        };

        upload.end_complete(result.is_ok());
        if result.is_ok() {
            tracing::debug!(upload_id = %upload.upload_id(), parts = parts.len(), "Multipart upload finalized");
        }
        result
    }
}

async fn abort_session(backend: &dyn Backend, upload: &MultipartUpload) -> Result<()> {
    match upload.begin_abort() {
        AbortAction::Skip => Ok(()),
        AbortAction::Cleanup => {
            let result = backend.abort_multipart(upload).await;
            upload.end_abort(result.is_ok());
            if result.is_ok() {
                tracing::debug!(upload_id = %upload.upload_id(), "Multipart upload aborted");
            }
            result
        }
    }
}

/// Spawns an abort if a `put_large` future is dropped mid-upload
struct AbortOnDrop {
    backend: Arc<dyn Backend>,
    upload: Arc<MultipartUpload>,
    armed: bool,
}

impl AbortOnDrop {
    fn new(backend: Arc<dyn Backend>, upload: Arc<MultipartUpload>) -> Self {
        Self {
            backend,
            upload,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let backend = self.backend.clone();
        let upload = self.upload.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = abort_session(backend.as_ref(), &upload).await {
                        tracing::warn!(upload_id = %upload.upload_id(), error = %e, "Abort of dropped upload failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    upload_id = %self.upload.upload_id(),
                    "Upload dropped outside a runtime; parts were not cleaned up"
                );
            }
        }
    }
}

/// Splits an upload source into parts of a fixed size
struct PartReader {
    part_size: usize,
    inner: ReaderInner,
}

enum ReaderInner {
    Bytes(Bytes),
    Stream {
        stream: ByteStream,
        buffer: BytesMut,
        done: bool,
    },
}

impl PartReader {
    fn new(source: UploadSource, part_size: u64) -> Self {
        let inner = match source {
            UploadSource::Bytes(data) => ReaderInner::Bytes(data),
            UploadSource::Stream { stream, .. } => ReaderInner::Stream {
                stream,
                buffer: BytesMut::new(),
                done: false,
            },
        };
        Self {
            part_size: usize::try_from(part_size).unwrap_or(usize::MAX),
            inner,
        }
    }

    fn set_part_size(&mut self, part_size: u64) {
        self.part_size = usize::try_from(part_size).unwrap_or(usize::MAX);
    }

    /// Exact remaining length, only known for in-memory payloads
    fn exact_len(&self) -> Option<u64> {
        match &self.inner {
            ReaderInner::Bytes(data) => Some(data.len() as u64),
            ReaderInner::Stream { .. } => None,
        }
    }

    /// Read until more than `limit` bytes are buffered or the source ends
    ///
    /// Returns the whole payload if it fits within `limit`; otherwise the
    /// buffered bytes stay queued for [`Self::next_part`].
    async fn read_whole_if_within(&mut self, limit: u64) -> Result<Option<Bytes>> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        match &mut self.inner {
            ReaderInner::Bytes(data) => {
                Ok((data.len() <= limit).then(|| std::mem::take(data)))
            }
            ReaderInner::Stream {
                stream,
                buffer,
                done,
            } => {
                while buffer.len() <= limit && !*done {
                    match stream.next().await {
                        Some(chunk) => buffer.extend_from_slice(&chunk?),
                        None => *done = true,
                    }
                }
                if *done && buffer.len() <= limit {
                    Ok(Some(buffer.split().freeze()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn next_part(&mut self) -> Result<Option<Bytes>> {
        let part_size = self.part_size;
        match &mut self.inner {
            ReaderInner::Bytes(data) => {
                if data.is_empty() {
                    return Ok(None);
                }
                let len = part_size.min(data.len());
                Ok(Some(data.split_to(len)))
            }
            ReaderInner::Stream {
                stream,
                buffer,
                done,
            } => {
                while buffer.len() < part_size && !*done {
                    match stream.next().await {
                        Some(chunk) => buffer.extend_from_slice(&chunk?),
                        None => *done = true,
                    }
                }
                if buffer.is_empty() {
                    return Ok(None);
                }
                let len = part_size.min(buffer.len());
                Ok(Some(buffer.split_to(len).freeze()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::multipart::UploadStatus;
    use std::time::Duration;

    fn engine() -> MultipartEngine {
        MultipartEngine::new(Arc::new(MemoryBackend::new()))
            .with_retry(RetryConfig::default().with_base_delay(Duration::ZERO))
    }

    fn chunked(data: &'static [u8], chunk: usize) -> ByteStream {
        let chunks: Vec<Result<Bytes>> = data
            .chunks(chunk)
            .map(|c| Ok(Bytes::from_static(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_part_reader_splits_bytes() {
        let mut reader = PartReader::new(UploadSource::from(&b"AAAAABBBBBC"[..]), 5);
        assert_eq!(reader.read_whole_if_within(5).await.unwrap(), None);
        assert_eq!(reader.next_part().await.unwrap().unwrap().as_ref(), b"AAAAA");
        assert_eq!(reader.next_part().await.unwrap().unwrap().as_ref(), b"BBBBB");
        assert_eq!(reader.next_part().await.unwrap().unwrap().as_ref(), b"C");
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_part_reader_rechunks_stream() {
        let source = UploadSource::stream(chunked(b"AAAAABBBBBC", 3), None);
        let mut reader = PartReader::new(source, 5);
        assert_eq!(reader.read_whole_if_within(5).await.unwrap(), None);

        let mut parts = Vec::new();
        while let Some(part) = reader.next_part().await.unwrap() {
            parts.push(part);
        }
        assert_eq!(parts, vec!["AAAAA", "BBBBB", "C"]);
    }

    #[tokio::test]
    async fn test_short_stream_is_read_whole() {
        let source = UploadSource::stream(chunked(b"hello", 2), None);
        let mut reader = PartReader::new(source, 5);
        assert_eq!(
            reader.read_whole_if_within(5).await.unwrap().unwrap().as_ref(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let engine = engine();
        let upload = engine
            .start_multipart_upload("f.bin", Some(5), &PutOptions::new())
            .await
            .unwrap();
        engine
            .upload_part(&upload, 1, Bytes::from_static(b"AAAAA"))
            .await
            .unwrap();
        engine
            .upload_part(&upload, 2, Bytes::from_static(b"BB"))
            .await
            .unwrap();
        let stored = engine.complete_multipart_upload(&upload).await.unwrap();

        assert_eq!(stored.size, 7);
        assert_eq!(upload.status(), UploadStatus::Finalized);
        assert_eq!(
            engine.backend().get_bytes("f.bin").await.unwrap().as_ref(),
            b"AAAAABB"
        );
    }

    #[tokio::test]
    async fn test_operations_after_finalize_are_rejected() {
        let engine = engine();
        let upload = engine
            .start_multipart_upload("f.bin", Some(5), &PutOptions::new())
            .await
            .unwrap();
        engine
            .upload_part(&upload, 1, Bytes::from_static(b"AAAAA"))
            .await
            .unwrap();
        engine.complete_multipart_upload(&upload).await.unwrap();

        assert!(engine
            .upload_part(&upload, 2, Bytes::from_static(b"B"))
            .await
            .is_err());
        assert!(engine.complete_multipart_upload(&upload).await.is_err());
        engine.abort_multipart_upload(&upload).await.unwrap();
        assert!(engine.backend().exists("f.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_large_direct_and_multipart() {
        let engine = engine();
        let data = Bytes::from(vec![7u8; 64]);

        let direct = engine
            .put_large("direct", data.clone(), PutLargeOptions::new().with_part_size(65))
            .await
            .unwrap();
        let split = engine
            .put_large("split", data.clone(), PutLargeOptions::new().with_part_size(10))
            .await
            .unwrap();

        assert_eq!(direct.size, 64);
        assert_eq!(split.size, 64);
        assert_eq!(engine.backend().get_bytes("split").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_put_large_empty_payload_goes_direct() {
        let engine = engine();
        let stored = engine
            .put_large("empty", Bytes::new(), PutLargeOptions::new().with_part_size(1))
            .await
            .unwrap();
        assert_eq!(stored.size, 0);
        assert!(engine.backend().exists("empty").await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_part_rejected() {
        let backend = MemoryBackend::with_config(crate::backend::MemoryConfig { max_size: Some(8) });
        let engine = MultipartEngine::new(Arc::new(backend));
        let err = engine
            .start_multipart_upload("k", Some(9), &PutOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
