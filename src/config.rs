/*!
 * Configuration types for polystore
 *
 * A [`StorageConfig`] is usually read from TOML:
 *
 * ```toml
 * [backend]
 * type = "s3"
 * bucket = "uploads"
 * region = "eu-west-1"
 *
 * [retry]
 * max_retries = 5
 * retry_on = ["connection", "capacity"]
 *
 * [multipart]
 * part_size = 16777216
 * concurrency = 8
 *
 * [logging]
 * level = "debug"
 * ```
 *
 * Backends can also be named by URI through [`parse_uri`].
 */

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::{BackendConfig, BackendKind};
use crate::core::retry::RetryConfig;
use crate::error::{ErrorKind, Result, StorageError};
use crate::multipart::{DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE};

/// Top-level configuration for a [`crate::Storage`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Backend selection and its settings
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub multipart: MultipartSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StorageConfig {
    /// Configuration with defaults for everything but the backend
    pub fn for_backend(backend: BackendConfig) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        // A backend compiled out of this build would otherwise surface as an
        // opaque unknown-variant error
        let peek: BackendTypePeek = toml::from_str(contents)
            .map_err(|e| StorageError::Configuration(format!("Invalid config: {}", e)))?;
        if let Some(kind) = peek.backend.and_then(|b| b.kind) {
            kind.parse::<BackendKind>()?.ensure_enabled()?;
        }

        let config: StorageConfig = toml::from_str(contents)
            .map_err(|e| StorageError::Configuration(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that serde cannot
    pub fn validate(&self) -> Result<()> {
        self.retry.to_retry_config()?;
        self.multipart.validate()
    }
}

#[derive(Deserialize)]
struct BackendTypePeek {
    backend: Option<BackendTypeField>,
}

#[derive(Deserialize)]
struct BackendTypeField {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Retry policy as written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,

    /// Ceiling for any single delay, in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Error categories that are retried
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            exponential_base: default_exponential_base(),
            jitter: true,
            retry_on: default_retry_on(),
        }
    }
}

impl RetrySettings {
    /// Build the runtime policy
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        let base_delay = seconds("retry.base_delay_secs", self.base_delay_secs)?;
        let max_delay = seconds("retry.max_delay_secs", self.max_delay_secs)?;

        if max_delay < base_delay {
            return Err(StorageError::Configuration(
                "retry.max_delay_secs is smaller than retry.base_delay_secs".into(),
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(StorageError::Configuration(format!(
                "retry.exponential_base must be at least 1.0, got {}",
                self.exponential_base
            )));
        }

        Ok(RetryConfig {
            max_retries: self.max_retries,
            base_delay,
            max_delay,
            exponential_base: self.exponential_base,
            jitter: self.jitter,
            retryable: self.retry_on.iter().copied().collect(),
        })
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        StorageError::Configuration(format!("{} must be a non-negative number, got {}", name, value))
    })
}

/// Part size and parallelism for `put_large`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartSettings {
    /// Requested part size in bytes, clamped to the backend limits
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Parts uploaded at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for MultipartSettings {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl MultipartSettings {
    fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            return Err(StorageError::Configuration(
                "multipart.part_size must be greater than zero".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(StorageError::Configuration(
                "multipart.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Logging settings consumed by [`crate::logging::init_logging`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for level = debug
    #[serde(default)]
    pub verbose: bool,
}

impl LoggingConfig {
    /// Level after applying `verbose`
    pub fn effective_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG.max(self.level.to_tracing_level())
        } else {
            self.level.to_tracing_level()
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    60.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_retry_on() -> Vec<ErrorKind> {
    vec![ErrorKind::Connection]
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

/// Parse a backend URI into a [`BackendConfig`]
///
/// Supported forms:
///
/// - `memory://`
/// - `file:///var/data` or a plain absolute path
/// - `s3://bucket/prefix?region=us-east-1&endpoint=http://localhost:9000&path_style=true`
/// - `az://container/prefix?account=name`
/// - `gs://bucket/prefix`
///
/// Naming a backend that is not compiled in is a configuration error.
pub fn parse_uri(uri: &str) -> Result<BackendConfig> {
    if uri.starts_with('/') || Path::new(uri).is_absolute() {
        return Ok(BackendConfig::filesystem(uri));
    }

    let url = Url::parse(uri)
        .map_err(|e| StorageError::Configuration(format!("Invalid backend URI '{}': {}", uri, e)))?;

    match url.scheme() {
        "memory" => Ok(BackendConfig::memory()),
        "file" => {
            let path = url.to_file_path().map_err(|_| {
                StorageError::Configuration(format!("Invalid file URI: {}", uri))
            })?;
            Ok(BackendConfig::filesystem(path))
        }
        "s3" => s3_from_url(&url),
        "az" | "azure" => azure_from_url(&url),
        "gs" | "gcs" => gcs_from_url(&url),
        other => match BackendKind::from_str(other) {
            Ok(kind) => Err(StorageError::Configuration(format!(
                "Unsupported URI scheme '{}' (did you mean the {} backend?)",
                other, kind
            ))),
            Err(_) => Err(StorageError::Configuration(format!(
                "Unsupported URI scheme: {}",
                other
            ))),
        },
    }
}

/// Bucket or container name from the URI host
#[cfg_attr(
    not(any(feature = "s3-native", feature = "azure-native", feature = "gcs-native")),
    allow(dead_code)
)]
fn uri_bucket(url: &Url) -> Result<String> {
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(StorageError::Configuration(format!(
            "URI '{}' is missing a bucket or container name",
            url
        ))),
    }
}

/// Key prefix from the URI path, if any
#[cfg_attr(
    not(any(feature = "s3-native", feature = "azure-native", feature = "gcs-native")),
    allow(dead_code)
)]
fn uri_prefix(url: &Url) -> Option<String> {
    let prefix = url.path().trim_matches('/');
    (!prefix.is_empty()).then(|| prefix.to_string())
}

#[cfg_attr(not(any(feature = "s3-native", feature = "azure-native")), allow(dead_code))]
fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(feature = "s3-native")]
fn s3_from_url(url: &Url) -> Result<BackendConfig> {
    let mut config = crate::backend::S3Config::new(uri_bucket(url)?);
    config.prefix = uri_prefix(url);
    config.region = query_param(url, "region");
    config.endpoint = query_param(url, "endpoint");
    if let Some(value) = query_param(url, "path_style") {
        config.force_path_style = value == "true" || value == "1";
    }
    Ok(BackendConfig::S3(config))
}

#[cfg(not(feature = "s3-native"))]
fn s3_from_url(_url: &Url) -> Result<BackendConfig> {
    Err(BackendKind::S3.unavailable())
}

#[cfg(feature = "azure-native")]
fn azure_from_url(url: &Url) -> Result<BackendConfig> {
    let mut config = crate::backend::AzureConfig::new(uri_bucket(url)?);
    config.prefix = uri_prefix(url);
    config.account = query_param(url, "account");
    Ok(BackendConfig::Azure(config))
}

#[cfg(not(feature = "azure-native"))]
fn azure_from_url(_url: &Url) -> Result<BackendConfig> {
    Err(BackendKind::Azure.unavailable())
}

#[cfg(feature = "gcs-native")]
fn gcs_from_url(url: &Url) -> Result<BackendConfig> {
    let mut config = crate::backend::GcsConfig::new(uri_bucket(url)?);
    config.prefix = uri_prefix(url);
    Ok(BackendConfig::Gcs(config))
}

#[cfg(not(feature = "gcs-native"))]
fn gcs_from_url(_url: &Url) -> Result<BackendConfig> {
    Err(BackendKind::Gcs.unavailable())
}
