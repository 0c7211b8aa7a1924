//! Multipart upload session
//!
//! A [`MultipartUpload`] is created by a backend's `begin_multipart`, then
//! shared by every part upload of one logical object. The part ledger lives
//! behind a mutex that is never held across an await, so concurrent part
//! uploads record their results safely.
//!
//! Lifecycle:
//!
//! ```text
//! Open ──complete──▶ Completing ──ok──▶ Finalized
//!   │                    └──err──▶ Failed ──abort──▶ Aborting ──▶ Aborted
//!   └────────────────abort──────────────────────────────▲
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use crate::backend::PartTag;
use crate::error::{Result, StorageError};

/// Lifecycle state of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Accepting parts
    Open,
    /// Finalize is in progress
    Completing,
    /// Object published; the session is spent
    Finalized,
    /// Finalize failed; only abort is valid
    Failed,
    /// Abort started but has not been confirmed
    Aborting,
    /// Cleanup done; the session is spent
    Aborted,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStatus::Open => "open",
            UploadStatus::Completing => "completing",
            UploadStatus::Finalized => "finalized",
            UploadStatus::Failed => "failed",
            UploadStatus::Aborting => "aborting",
            UploadStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartStatus {
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug)]
struct PartRecord {
    size: u64,
    fingerprint: blake3::Hash,
    status: PartStatus,
    tag: Option<PartTag>,
}

#[derive(Debug)]
struct SessionState {
    status: UploadStatus,
    parts: BTreeMap<u32, PartRecord>,
    /// Part payloads held locally by client-buffered backends
    buffered: BTreeMap<u32, Bytes>,
}

/// Outcome of reserving a part number
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PartReservation {
    /// The caller must upload the part
    Upload,
    /// Identical bytes were already uploaded under this number
    AlreadyCompleted(PartTag),
}

/// Whether abort still needs to contact the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortAction {
    Cleanup,
    Skip,
}

/// One in-flight large upload
pub struct MultipartUpload {
    upload_id: String,
    key: String,
    part_size: u64,
    total_parts: Option<u32>,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    state: Mutex<SessionState>,
}

impl MultipartUpload {
    /// Create an open session
    ///
    /// Backends call this from `begin_multipart` with either a
    /// server-assigned upload id or a locally generated one.
    pub fn new(
        upload_id: impl Into<String>,
        key: impl Into<String>,
        part_size: u64,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            key: key.into(),
            part_size,
            total_parts: None,
            content_type,
            metadata,
            state: Mutex::new(SessionState {
                status: UploadStatus::Open,
                parts: BTreeMap::new(),
                buffered: BTreeMap::new(),
            }),
        }
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Effective part size after backend bounds were applied
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Number of parts, if declared up front
    pub fn total_parts(&self) -> Option<u32> {
        self.total_parts
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn status(&self) -> UploadStatus {
        self.lock().status
    }

    /// Completed parts in part-number order
    pub fn completed_parts(&self) -> Vec<(u32, PartTag)> {
        self.lock()
            .parts
            .iter()
            .filter_map(|(number, record)| match (&record.status, &record.tag) {
                (PartStatus::Completed, Some(tag)) => Some((*number, tag.clone())),
                _ => None,
            })
            .collect()
    }

    /// Bytes across completed parts
    pub fn completed_bytes(&self) -> u64 {
        self.lock()
            .parts
            .values()
            .filter(|record| record.status == PartStatus::Completed)
            .map(|record| record.size)
            .sum()
    }

    /// Declare how many parts the upload will have
    pub fn set_total_parts(&mut self, total_parts: Option<u32>) {
        self.total_parts = total_parts;
    }

    /// Hold a part payload locally (client-buffered strategy)
    pub fn buffer_part(&self, part_number: u32, data: Bytes) {
        self.lock().buffered.insert(part_number, data);
    }

    /// Concatenate buffered parts in part-number order
    ///
    /// The buffer is kept until the session is finalized or aborted, so a
    /// retried finalize sees the same payload.
    pub fn assemble_buffered(&self) -> Bytes {
        let state = self.lock();
        let total: usize = state.buffered.values().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for chunk in state.buffered.values() {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }

    /// Drop every buffered part
    pub fn discard_buffered(&self) {
        self.lock().buffered.clear();
    }

    /// Bytes currently held in the local buffer
    pub fn buffered_bytes(&self) -> u64 {
        self.lock().buffered.values().map(|b| b.len() as u64).sum()
    }

    /// Reserve `part_number` for an upload of `data`
    ///
    /// New numbers must follow the highest number seen so far. A completed
    /// part sent again with identical bytes is answered from the ledger; a
    /// resend with different bytes is rejected.
    pub(crate) fn reserve_part(
        &self,
        part_number: u32,
        data: &[u8],
        max_parts: Option<u32>,
    ) -> Result<PartReservation> {
        if part_number == 0 {
            return Err(self.invalid_part(part_number, "part numbers start at 1"));
        }
        if let Some(max) = max_parts {
            if part_number > max {
                return Err(self.invalid_part(
                    part_number,
                    format!("backend accepts at most {} parts", max),
                ));
            }
        }
        if let Some(total) = self.total_parts {
            if part_number > total {
                return Err(self.invalid_part(
                    part_number,
                    format!("upload was declared with {} parts", total),
                ));
            }
        }

        let fingerprint = blake3::hash(data);
        let mut state = self.lock();
        if state.status != UploadStatus::Open {
            return Err(self.invalid_state("upload part", state.status));
        }

        if let Some(record) = state.parts.get_mut(&part_number) {
            if record.fingerprint != fingerprint {
                return Err(self.invalid_part(
                    part_number,
                    "part was already sent with different content",
                ));
            }
            return match (record.status, &record.tag) {
                (PartStatus::Completed, Some(tag)) => {
                    Ok(PartReservation::AlreadyCompleted(tag.clone()))
                }
                (PartStatus::InFlight, _) => {
                    Err(self.invalid_part(part_number, "part upload already in flight"))
                }
                _ => {
                    record.status = PartStatus::InFlight;
                    Ok(PartReservation::Upload)
                }
            };
        }

        let first = state.parts.keys().next().copied();
        let next = state.parts.keys().next_back().map_or(1, |last| last + 1);
        if let Some(first) = first {
            if part_number < first {
                return Err(self.invalid_part(
                    part_number,
                    format!("part number precedes first part {}", first),
                ));
            }
        }
        if part_number != next {
            return Err(self.invalid_part(
                part_number,
                format!("expected part {} next", next),
            ));
        }

        state.parts.insert(
            part_number,
            PartRecord {
                size: data.len() as u64,
                fingerprint,
                status: PartStatus::InFlight,
                tag: None,
            },
        );
        Ok(PartReservation::Upload)
    }

    /// Record a successful part upload
    pub(crate) fn complete_part(&self, part_number: u32, tag: PartTag) {
        if let Some(record) = self.lock().parts.get_mut(&part_number) {
            record.status = PartStatus::Completed;
            record.tag = Some(tag);
        }
    }

    /// Record a failed part upload; the same bytes may be sent again
    pub(crate) fn fail_part(&self, part_number: u32) {
        if let Some(record) = self.lock().parts.get_mut(&part_number) {
            if record.status == PartStatus::InFlight {
                record.status = PartStatus::Failed;
            }
        }
    }

    /// Validate the ledger and move to `Completing`
    ///
    /// Returns the ordered `(part_number, tag)` list to commit. Every part but
    /// the last must be at least `min_part_size` bytes.
    pub(crate) fn begin_complete(&self, min_part_size: u64) -> Result<Vec<(u32, PartTag)>> {
        let mut state = self.lock();
        if state.status != UploadStatus::Open {
            return Err(self.invalid_state("complete", state.status));
        }
        if state.parts.is_empty() {
            return Err(self.invalid_state("complete", "open with no parts"));
        }

        let last = state.parts.keys().next_back().copied().unwrap_or_default();
        let mut ordered = Vec::with_capacity(state.parts.len());
        for (number, record) in &state.parts {
            match (record.status, &record.tag) {
                (PartStatus::Completed, Some(tag)) => {
                    if *number != last && record.size < min_part_size {
                        return Err(self.invalid_part(
                            *number,
                            format!(
                                "{} bytes is below the minimum part size {}",
                                record.size, min_part_size
                            ),
                        ));
                    }
                    ordered.push((*number, tag.clone()));
                }
                (PartStatus::InFlight, _) => {
                    return Err(self.invalid_part(*number, "part upload still in flight"));
                }
                _ => {
                    return Err(self.invalid_part(*number, "part upload did not succeed"));
                }
            }
        }

        if let Some(total) = self.total_parts {
            if u32::try_from(ordered.len()).ok() != Some(total) {
                return Err(self.invalid_state(
                    "complete",
                    format!("open with {} of {} parts", ordered.len(), total),
                ));
            }
        }

        state.status = UploadStatus::Completing;
        Ok(ordered)
    }

    /// Settle a finalize attempt started with [`Self::begin_complete`]
    pub(crate) fn end_complete(&self, succeeded: bool) {
        let mut state = self.lock();
        if succeeded {
            state.status = UploadStatus::Finalized;
            state.buffered.clear();
        } else {
            state.status = UploadStatus::Failed;
        }
    }

    /// Move to `Aborting` unless the session is already spent
    pub(crate) fn begin_abort(&self) -> AbortAction {
        let mut state = self.lock();
        match state.status {
            UploadStatus::Finalized | UploadStatus::Aborted => AbortAction::Skip,
            _ => {
                state.status = UploadStatus::Aborting;
                AbortAction::Cleanup
            }
        }
    }

    /// Settle an abort; a failed abort may be attempted again
    pub(crate) fn end_abort(&self, succeeded: bool) {
        let mut state = self.lock();
        if succeeded {
            state.status = UploadStatus::Aborted;
            state.buffered.clear();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn invalid_part(&self, part_number: u32, reason: impl Into<String>) -> StorageError {
        StorageError::InvalidPart {
            upload_id: self.upload_id.clone(),
            part_number,
            reason: reason.into(),
        }
    }

    fn invalid_state(&self, operation: &'static str, state: impl ToString) -> StorageError {
        StorageError::InvalidUploadState {
            upload_id: self.upload_id.clone(),
            operation,
            state: state.to_string(),
        }
    }
}

impl fmt::Debug for MultipartUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartUpload")
            .field("upload_id", &self.upload_id)
            .field("key", &self.key)
            .field("part_size", &self.part_size)
            .field("total_parts", &self.total_parts)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn session() -> MultipartUpload {
        MultipartUpload::new("u-1", "f.bin", 5, None, HashMap::new())
    }

    fn upload(session: &MultipartUpload, n: u32, data: &[u8]) {
        assert_eq!(
            session.reserve_part(n, data, None).unwrap(),
            PartReservation::Upload
        );
        session.complete_part(n, PartTag::new(format!("tag-{}", n)));
    }

    #[test]
    fn test_part_zero_rejected() {
        let err = session().reserve_part(0, b"x", None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidPart { part_number: 0, .. }));
    }

    #[test]
    fn test_parts_must_be_sequential() {
        let s = session();
        assert!(s.reserve_part(2, b"x", None).is_err());
        upload(&s, 1, b"AAAAA");
        assert!(s.reserve_part(3, b"x", None).is_err());
        upload(&s, 2, b"BB");
        assert_eq!(s.completed_parts().len(), 2);
    }

    #[test]
    fn test_identical_resend_returns_recorded_tag() {
        let s = session();
        upload(&s, 1, b"AAAAA");
        assert_eq!(
            s.reserve_part(1, b"AAAAA", None).unwrap(),
            PartReservation::AlreadyCompleted(PartTag::new("tag-1"))
        );
    }

    #[test]
    fn test_different_resend_rejected() {
        let s = session();
        upload(&s, 1, b"AAAAA");
        let err = s.reserve_part(1, b"CCCCC", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_failed_part_can_be_retried() {
        let s = session();
        s.reserve_part(1, b"AAAAA", None).unwrap();
        assert!(s.reserve_part(1, b"AAAAA", None).is_err());
        s.fail_part(1);
        assert_eq!(
            s.reserve_part(1, b"AAAAA", None).unwrap(),
            PartReservation::Upload
        );
    }

    #[test]
    fn test_max_parts_enforced() {
        let s = session();
        upload(&s, 1, b"AAAAA");
        let err = s.reserve_part(2, b"BB", Some(1)).unwrap_err();
        assert!(err.to_string().contains("at most 1 parts"));
    }

    #[test]
    fn test_complete_requires_parts() {
        let err = session().begin_complete(1).unwrap_err();
        assert!(matches!(err, StorageError::InvalidUploadState { .. }));
    }

    #[test]
    fn test_complete_enforces_minimum_except_last() {
        let s = session();
        upload(&s, 1, b"AAAA");
        upload(&s, 2, b"B");
        assert!(s.begin_complete(5).is_err());
        assert_eq!(s.status(), UploadStatus::Open);

        let s = session();
        upload(&s, 1, b"AAAAA");
        upload(&s, 2, b"B");
        let parts = s.begin_complete(5).unwrap();
        assert_eq!(parts.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(s.status(), UploadStatus::Completing);
    }

    #[test]
    fn test_complete_rejects_in_flight_part() {
        let s = session();
        upload(&s, 1, b"AAAAA");
        s.reserve_part(2, b"BB", None).unwrap();
        assert!(s.begin_complete(1).is_err());
    }

    #[test]
    fn test_failed_complete_allows_only_abort() {
        let s = session();
        upload(&s, 1, b"AAAAA");
        s.begin_complete(1).unwrap();
        s.end_complete(false);
        assert_eq!(s.status(), UploadStatus::Failed);
        assert!(s.reserve_part(2, b"BB", None).is_err());
        assert!(s.begin_complete(1).is_err());
        assert_eq!(s.begin_abort(), AbortAction::Cleanup);
    }

    #[test]
    fn test_abort_is_idempotent() {
        let s = session();
        assert_eq!(s.begin_abort(), AbortAction::Cleanup);
        s.end_abort(false);
        assert_eq!(s.begin_abort(), AbortAction::Cleanup);
        s.end_abort(true);
        assert_eq!(s.status(), UploadStatus::Aborted);
        assert_eq!(s.begin_abort(), AbortAction::Skip);
    }

    #[test]
    fn test_abort_after_finalize_is_noop() {
        let s = session();
        upload(&s, 1, b"AAAAA");
        s.begin_complete(1).unwrap();
        s.end_complete(true);
        assert_eq!(s.begin_abort(), AbortAction::Skip);
        assert_eq!(s.status(), UploadStatus::Finalized);
    }

    #[test]
    fn test_buffer_assembles_in_part_order() {
        let s = session();
        s.buffer_part(2, Bytes::from_static(b"BB"));
        s.buffer_part(1, Bytes::from_static(b"AAAAA"));
        assert_eq!(s.assemble_buffered().as_ref(), b"AAAAABB");
        assert_eq!(s.buffered_bytes(), 7);
        s.discard_buffered();
        assert_eq!(s.buffered_bytes(), 0);
    }

    #[test]
    fn test_declared_total_parts() {
        let mut s = session();
        s.set_total_parts(Some(2));
        upload(&s, 1, b"AAAAA");
        assert!(s.begin_complete(1).is_err());
        assert_eq!(s.status(), UploadStatus::Open);
        assert!(s.reserve_part(3, b"C", None).is_err());
    }
}
