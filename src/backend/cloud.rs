//! Shared plumbing for the object_store based backends (Azure, GCS)

use std::collections::HashMap;
use std::error::Error as StdError;

use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectMeta, ObjectStore};
use reqwest::StatusCode;

use super::types::{ByteStream, ListStream, PutOptions, StoredFile};
use super::{key_with_prefix, key_without_prefix};
use crate::error::{Result, StorageError};

/// Object path for a caller key under an optional configured prefix
pub(crate) fn object_path(key: &str, prefix: Option<&str>) -> ObjectPath {
    ObjectPath::from(key_with_prefix(key, prefix))
}

/// Map an object_store failure onto the error taxonomy
///
/// The variant decides first, then the HTTP status of the underlying
/// transport error, and only then the rendered message.
pub(crate) fn map_store_error(backend: &str, key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::not_found(key),
        object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists {
            key: key.to_string(),
        },
        object_store::Error::InvalidPath { .. } => StorageError::InvalidArgument(err.to_string()),
        object_store::Error::Precondition { .. }
        | object_store::Error::NotModified { .. }
        | object_store::Error::NotSupported { .. }
        | object_store::Error::NotImplemented => StorageError::backend(backend, err.to_string()),
        other => {
            let message = other.to_string();
            match transport_error(&other) {
                Some(cause) => classify_transport(backend, key, cause, &message),
                None => classify_message(backend, key, &message),
            }
        }
    }
}

/// First reqwest error in the source chain
fn transport_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a reqwest::Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(cause) = e.downcast_ref::<reqwest::Error>() {
            return Some(cause);
        }
        current = e.source();
    }
    None
}

/// Classify a failed HTTP exchange made by reqwest
pub(crate) fn classify_transport(
    backend: &str,
    key: &str,
    cause: &reqwest::Error,
    message: &str,
) -> StorageError {
    match cause.status() {
        Some(status) => classify_status(backend, key, status, message),
        None if cause.is_timeout() || cause.is_connect() || cause.is_request() || cause.is_body() => {
            StorageError::connection(backend, message)
        }
        None => classify_message(backend, key, message),
    }
}

/// Map an HTTP status onto the error taxonomy
pub(crate) fn classify_status(
    backend: &str,
    key: &str,
    status: StatusCode,
    message: &str,
) -> StorageError {
    match status {
        StatusCode::NOT_FOUND => StorageError::not_found(key),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::PermissionDenied {
            key: key.to_string(),
            message: message.to_string(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            StorageError::connection(backend, message)
        }
        s if s.is_server_error() => StorageError::connection(backend, message),
        _ => StorageError::backend(backend, message),
    }
}

/// HTTP status quoted as "status NNN" in an error message
fn status_in_message(message: &str) -> Option<StatusCode> {
    message.match_indices("status ").find_map(|(i, token)| {
        let start = i + token.len();
        let code = message.get(start..start + 3)?.parse::<u16>().ok()?;
        StatusCode::from_u16(code).ok()
    })
}

fn classify_message(backend: &str, key: &str, message: &str) -> StorageError {
    if let Some(status) = status_in_message(message) {
        return classify_status(backend, key, status, message);
    }

    if message.contains("BlobNotFound") || message.contains("ContainerNotFound") {
        StorageError::not_found(key)
    } else if message.contains("AuthenticationFailed") || message.contains("AuthorizationFailure") {
        StorageError::PermissionDenied {
            key: key.to_string(),
            message: message.to_string(),
        }
    } else if message.contains("timed out") || message.contains("connection reset") {
        StorageError::connection(backend, message)
    } else {
        StorageError::backend(backend, message)
    }
}

/// Content type and user metadata as object attributes
pub(crate) fn put_attributes(options: &PutOptions) -> object_store::PutOptions {
    let mut attributes = Attributes::new();
    if let Some(content_type) = &options.content_type {
        attributes.insert(Attribute::ContentType, AttributeValue::from(content_type.clone()));
    }
    for (k, v) in &options.metadata {
        attributes.insert(Attribute::Metadata(k.clone().into()), AttributeValue::from(v.clone()));
    }

    object_store::PutOptions {
        attributes,
        ..Default::default()
    }
}

/// Build a [`StoredFile`] from object metadata and its attributes
pub(crate) fn stored_file(
    key: impl Into<String>,
    meta: &ObjectMeta,
    attributes: Option<&Attributes>,
) -> StoredFile {
    let mut content_type = None;
    let mut metadata = HashMap::new();

    for (attribute, value) in attributes.into_iter().flat_map(|a| a.iter()) {
        let value: &str = value.as_ref();
        match attribute {
            Attribute::ContentType => content_type = Some(value.to_string()),
            Attribute::Metadata(name) => {
                metadata.insert(name.to_string(), value.to_string());
            }
            _ => {}
        }
    }

    let mut file = StoredFile::new(key, meta.size as u64)
        .with_content_type(content_type)
        .with_last_modified(meta.last_modified)
        .with_metadata(metadata);
    if let Some(etag) = &meta.e_tag {
        file = file.with_etag(etag.clone());
    }
    file
}

/// Read an object as a byte stream
pub(crate) async fn get_stream(
    store: &dyn ObjectStore,
    backend: &'static str,
    key: &str,
    location: &ObjectPath,
) -> Result<ByteStream> {
    let result = store
        .get(location)
        .await
        .map_err(|e| map_store_error(backend, key, e))?;

    let key = key.to_string();
    Ok(Box::pin(
        result
            .into_stream()
            .map_err(move |e| map_store_error(backend, &key, e)),
    ))
}

/// List objects whose caller key starts with `prefix`, sorted by key
///
/// object_store lists by path segment, so the listing starts at the
/// directory containing `prefix` and is filtered by string prefix.
pub(crate) async fn list_prefix(
    store: &dyn ObjectStore,
    backend: &'static str,
    store_prefix: Option<&str>,
    prefix: &str,
    limit: Option<usize>,
) -> Result<ListStream> {
    let full = key_with_prefix(prefix, store_prefix);
    let directory = full.rfind('/').map(|i| ObjectPath::from(&full[..i]));

    let objects: Vec<ObjectMeta> = store
        .list(directory.as_ref())
        .try_collect()
        .await
        .map_err(|e| map_store_error(backend, prefix, e))?;

    let mut files: Vec<StoredFile> = objects
        .iter()
        .filter(|meta| meta.location.as_ref().starts_with(full.as_str()))
        .map(|meta| {
            let key = key_without_prefix(meta.location.as_ref(), store_prefix);
            stored_file(key, meta, None)
        })
        .collect();
    files.sort_by(|a, b| a.key.cmp(&b.key));
    files.truncate(limit.unwrap_or(usize::MAX));

    Ok(Box::pin(futures::stream::iter(files.into_iter().map(Ok))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Utc;

    #[test]
    fn test_object_path_applies_prefix() {
        assert_eq!(object_path("a/b.txt", Some("root")).as_ref(), "root/a/b.txt");
        assert_eq!(object_path("/a.txt", None).as_ref(), "a.txt");
    }

    #[test]
    fn test_classify_message() {
        assert!(classify_message("gcs", "k", "HTTP status 404 Not Found").is_not_found());
        assert_eq!(
            classify_message("azure", "k", "AuthenticationFailed").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_message("gcs", "k", "operation timed out").kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            classify_message("azure", "k", "Client error with status 503 Service Unavailable: busy")
                .kind(),
            ErrorKind::Connection
        );
        assert_eq!(classify_message("gcs", "k", "bad").kind(), ErrorKind::Other);
    }

    #[test]
    fn test_status_digits_in_paths_are_ignored() {
        let message = "Generic error: unexpected response for reports/500/404/summary.csv";
        assert_eq!(status_in_message(message), None);
        assert_eq!(
            classify_message("azure", "reports/500/404/summary.csv", message).kind(),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status("azure", "k", StatusCode::NOT_FOUND, "").is_not_found());
        assert_eq!(
            classify_status("azure", "k", StatusCode::FORBIDDEN, "").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_status("gcs", "k", StatusCode::TOO_MANY_REQUESTS, "").kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            classify_status("gcs", "k", StatusCode::BAD_GATEWAY, "").kind(),
            ErrorKind::Connection
        );
        assert_eq!(
            classify_status("gcs", "k", StatusCode::BAD_REQUEST, "").kind(),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_store_error_variants_decide_first() {
        let err = object_store::Error::NotFound {
            path: "uploads/500.bin".into(),
            source: "missing".into(),
        };
        assert!(map_store_error("azure", "500.bin", err).is_not_found());

        let err = object_store::Error::Generic {
            store: "MicrosoftAzure",
            source: "listing of 500/ failed".into(),
        };
        assert_eq!(map_store_error("azure", "500/", err).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_attributes_round_trip_into_stored_file() {
        let mut metadata = HashMap::new();
        metadata.insert("owner".to_string(), "ops".to_string());
        let options = PutOptions::new()
            .with_content_type("image/png")
            .with_metadata(metadata.clone());

        let put = put_attributes(&options);
        let meta = ObjectMeta {
            location: ObjectPath::from("root/a.png"),
            last_modified: Utc::now(),
            size: 3,
            e_tag: Some("\"e\"".to_string()),
            version: None,
        };

        let file = stored_file("a.png", &meta, Some(&put.attributes));
        assert_eq!(file.key, "a.png");
        assert_eq!(file.size, 3);
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(file.metadata, metadata);
        assert_eq!(file.etag.as_deref(), Some("\"e\""));
    }
}
