//! Backend selection and construction
//!
//! The set of backends is closed: [`BackendConfig`] names one of them and
//! [`create_backend`] builds it. Remote backends are compiled in only with
//! their cargo feature; asking for one that is not compiled in is a
//! configuration error.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use super::{Backend, FileSystemBackend, FileSystemConfig, MemoryBackend, MemoryConfig};
use crate::error::{Result, StorageError};

#[cfg(feature = "s3-native")]
use super::{S3Backend, S3Config};

#[cfg(feature = "azure-native")]
use super::{AzureBackend, AzureConfig};

#[cfg(feature = "gcs-native")]
use super::{GcsBackend, GcsConfig};

/// Every backend variant, whether or not it is compiled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    Filesystem,
    S3,
    Azure,
    Gcs,
}

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Memory,
        BackendKind::Filesystem,
        BackendKind::S3,
        BackendKind::Azure,
        BackendKind::Gcs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Filesystem => "filesystem",
            BackendKind::S3 => "s3",
            BackendKind::Azure => "azure",
            BackendKind::Gcs => "gcs",
        }
    }

    /// Cargo feature gating this backend (None = always available)
    pub fn feature(&self) -> Option<&'static str> {
        match self {
            BackendKind::Memory | BackendKind::Filesystem => None,
            BackendKind::S3 => Some("s3-native"),
            BackendKind::Azure => Some("azure-native"),
            BackendKind::Gcs => Some("gcs-native"),
        }
    }

    /// Whether this build includes the backend
    pub fn is_enabled(&self) -> bool {
        match self {
            BackendKind::Memory | BackendKind::Filesystem => true,
            BackendKind::S3 => cfg!(feature = "s3-native"),
            BackendKind::Azure => cfg!(feature = "azure-native"),
            BackendKind::Gcs => cfg!(feature = "gcs-native"),
        }
    }

    /// Error for a backend that this build does not include
    pub fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(self.unavailable())
        }
    }

    pub(crate) fn unavailable(&self) -> StorageError {
        StorageError::Configuration(format!(
            "{} backend not available: rebuild with --features {}",
            self,
            self.feature().unwrap_or("default")
        ))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "filesystem" | "file" | "local" => Ok(BackendKind::Filesystem),
            "s3" => Ok(BackendKind::S3),
            "azure" | "az" => Ok(BackendKind::Azure),
            "gcs" | "gs" => Ok(BackendKind::Gcs),
            other => Err(StorageError::Configuration(format!(
                "unknown backend type: {}",
                other
            ))),
        }
    }
}

/// Configuration for one backend, tagged by `type`
///
/// ```toml
/// [backend]
/// type = "filesystem"
/// path = "/var/lib/uploads"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory(MemoryConfig),

    Filesystem(FileSystemConfig),

    #[cfg(feature = "s3-native")]
    S3(S3Config),

    #[cfg(feature = "azure-native")]
    Azure(AzureConfig),

    #[cfg(feature = "gcs-native")]
    Gcs(GcsConfig),
}

impl BackendConfig {
    pub fn memory() -> Self {
        BackendConfig::Memory(MemoryConfig::default())
    }

    pub fn filesystem(path: impl Into<std::path::PathBuf>) -> Self {
        BackendConfig::Filesystem(FileSystemConfig::new(path))
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Memory(_) => BackendKind::Memory,
            BackendConfig::Filesystem(_) => BackendKind::Filesystem,
            #[cfg(feature = "s3-native")]
            BackendConfig::S3(_) => BackendKind::S3,
            #[cfg(feature = "azure-native")]
            BackendConfig::Azure(_) => BackendKind::Azure,
            #[cfg(feature = "gcs-native")]
            BackendConfig::Gcs(_) => BackendKind::Gcs,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::memory()
    }
}

/// Build the backend described by `config`
///
/// # Example
///
/// ```
/// use polystore::backend::{create_backend, BackendConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = create_backend(&BackendConfig::memory()).await?;
/// assert_eq!(backend.backend_name(), "memory");
/// # Ok(())
/// # }
/// ```
pub async fn create_backend(config: &BackendConfig) -> Result<Arc<dyn Backend>> {
    tracing::debug!(backend = %config.kind(), "creating backend");

    let backend: Arc<dyn Backend> = match config {
        BackendConfig::Memory(memory) => Arc::new(MemoryBackend::with_config(memory.clone())),
        BackendConfig::Filesystem(fs) => Arc::new(FileSystemBackend::new(fs.clone())?),
        #[cfg(feature = "s3-native")]
        BackendConfig::S3(s3) => Arc::new(S3Backend::new(s3.clone()).await?),
        #[cfg(feature = "azure-native")]
        BackendConfig::Azure(azure) => Arc::new(AzureBackend::new(azure.clone())?),
        #[cfg(feature = "gcs-native")]
        BackendConfig::Gcs(gcs) => Arc::new(GcsBackend::new(gcs.clone())?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("local".parse::<BackendKind>().unwrap(), BackendKind::Filesystem);
        assert!("ftp".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_local_backends_always_enabled() {
        assert!(BackendKind::Memory.is_enabled());
        assert!(BackendKind::Filesystem.ensure_enabled().is_ok());
    }

    #[cfg(not(feature = "s3-native"))]
    #[test]
    fn test_disabled_backend_is_configuration_error() {
        let err = BackendKind::S3.ensure_enabled().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("s3-native"));
    }

    #[test]
    fn test_deserialize_tagged_config() {
        let config: BackendConfig = toml::from_str(
            r#"
            type = "memory"
            max_size = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.kind(), BackendKind::Memory);

        let config: BackendConfig = toml::from_str(
            r#"
            type = "filesystem"
            path = "/tmp/uploads"
            base_url = "https://cdn.example.com"
            "#,
        )
        .unwrap();
        match config {
            BackendConfig::Filesystem(fs) => {
                assert_eq!(fs.base_url.as_deref(), Some("https://cdn.example.com"));
                assert!(fs.create_dirs);
            }
            other => panic!("unexpected config: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_local_backends() {
        let memory = create_backend(&BackendConfig::memory()).await.unwrap();
        assert_eq!(memory.backend_name(), "memory");

        let dir = TempDir::new().unwrap();
        let fs = create_backend(&BackendConfig::filesystem(dir.path().join("store")))
            .await
            .unwrap();
        assert_eq!(fs.backend_name(), "filesystem");
        assert!(dir.path().join("store").is_dir());
    }
}
