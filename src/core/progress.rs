/*!
 * Progress reporting for uploads and downloads
 *
 * Two shapes are provided:
 * - [`ProgressStream`] wraps a byte stream and reports after every chunk
 * - [`ProgressTracker`] is a shared counter advanced by the multipart engine
 *   each time a part upload succeeds
 *
 * Callbacks run inline on the transfer path and must return quickly. Use
 * [`progress_channel`] to hand events to a separate consumer instead.
 */

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project::pin_project;
use tokio::sync::mpsc;

use crate::error::Result;

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOperation {
    Upload,
    Download,
}

impl fmt::Display for TransferOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOperation::Upload => f.write_str("upload"),
            TransferOperation::Download => f.write_str("download"),
        }
    }
}

/// Snapshot of a transfer's progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Bytes moved so far; never decreases within one transfer
    pub bytes_transferred: u64,
    /// Total size when known up front
    pub total_bytes: Option<u64>,
    pub operation: TransferOperation,
    pub key: String,
}

impl ProgressInfo {
    /// Percent complete, if the total is known and non-zero
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some(self.bytes_transferred as f64 / total as f64 * 100.0),
            _ => None,
        }
    }
}

/// Callback invoked with every progress snapshot
pub type ProgressCallback = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;

/// Stream adapter that reports progress for each chunk it yields
///
/// Chunks, their order and stream termination pass through unchanged.
#[pin_project]
pub struct ProgressStream<S> {
    #[pin]
    inner: S,
    callback: Option<ProgressCallback>,
    bytes_transferred: u64,
    total_bytes: Option<u64>,
    operation: TransferOperation,
    key: String,
}

impl<S> ProgressStream<S> {
    pub fn new(
        inner: S,
        key: impl Into<String>,
        operation: TransferOperation,
        total_bytes: Option<u64>,
        callback: Option<ProgressCallback>,
    ) -> Self {
        Self {
            inner,
            callback,
            bytes_transferred: 0,
            total_bytes,
            operation,
            key: key.into(),
        }
    }

    /// Bytes yielded so far
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let poll = this.inner.poll_next(cx);

        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            *this.bytes_transferred += chunk.len() as u64;
            if let Some(callback) = this.callback {
                callback(&ProgressInfo {
                    bytes_transferred: *this.bytes_transferred,
                    total_bytes: *this.total_bytes,
                    operation: *this.operation,
                    key: this.key.clone(),
                });
            }
        }

        poll
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Shared monotonic byte counter for transfers made of concurrent parts
///
/// The counter is only advanced for work that has succeeded, so a part that
/// fails and is retried contributes nothing until it finally lands.
pub struct ProgressTracker {
    transferred: Mutex<u64>,
    total_bytes: Option<u64>,
    operation: TransferOperation,
    key: String,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(
        key: impl Into<String>,
        operation: TransferOperation,
        total_bytes: Option<u64>,
        callback: Option<ProgressCallback>,
    ) -> Self {
        Self {
            transferred: Mutex::new(0),
            total_bytes,
            operation,
            key: key.into(),
            callback,
        }
    }

    /// Record `bytes` more transferred and notify the callback
    pub fn advance(&self, bytes: u64) {
        // Held across the callback so concurrent parts report in counter order
        let mut transferred = match self.transferred.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *transferred += bytes;

        if let Some(callback) = &self.callback {
            callback(&ProgressInfo {
                bytes_transferred: *transferred,
                total_bytes: self.total_bytes,
                operation: self.operation,
                key: self.key.clone(),
            });
        }
    }

    /// Bytes recorded so far
    pub fn bytes_transferred(&self) -> u64 {
        match self.transferred.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("key", &self.key)
            .field("operation", &self.operation)
            .field("bytes_transferred", &self.bytes_transferred())
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

/// Create a callback that forwards snapshots to a bounded channel
///
/// The callback never blocks: when the receiver falls behind and the channel
/// is full, the snapshot is dropped. Snapshots that do arrive are still in
/// non-decreasing order.
pub fn progress_channel(capacity: usize) -> (ProgressCallback, mpsc::Receiver<ProgressInfo>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let callback: ProgressCallback = Arc::new(move |info: &ProgressInfo| {
        if tx.try_send(info.clone()).is_err() {
            tracing::trace!(key = %info.key, "Progress event dropped");
        }
    });
    (callback, rx)
}
