/*!
 * polystore - one async storage API over interchangeable backends
 *
 * - In-memory and local filesystem backends, always available
 * - S3, Azure Blob Storage and Google Cloud Storage behind cargo features
 * - A multipart engine that hides the three remote part-upload models
 *   (server-tracked parts, staged blocks, client-side buffering)
 * - Retry with jittered exponential backoff for transient failures
 * - Progress callbacks for uploads and downloads
 *
 * Start with [`Storage`], built either from a backend directly or from a
 * [`config::StorageConfig`].
 */

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod multipart;
pub mod storage;

// Re-export commonly used types
pub use backend::{Backend, ListOptions, PutOptions, StoredFile};
pub use config::{parse_uri, StorageConfig};
pub use core::progress::{ProgressCallback, ProgressInfo, TransferOperation};
pub use core::retry::{with_retry, RetryConfig};
pub use error::{ErrorKind, Result, StorageError};
pub use multipart::{MultipartEngine, MultipartUpload, PutLargeOptions, UploadSource, UploadStatus};
pub use storage::Storage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
