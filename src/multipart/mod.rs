//! Unified multipart uploads across backends
//!
//! - [`MultipartUpload`]: the per-upload session and its part ledger
//! - [`MultipartEngine`]: drives begin / upload part / complete / abort and
//!   the `put_large` convenience path

mod engine;
mod session;

pub use engine::{
    MultipartEngine, PutLargeOptions, UploadSource, DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE,
};
pub use session::{MultipartUpload, UploadStatus};
