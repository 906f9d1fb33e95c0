//! Store configuration module.
//!
//! This module provides configuration loading for a revstore instance from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `REVSTORE_DIRECTORY`: Directory holding the commit log and attachment blobs (required)
//! - `REVSTORE_DOC_CACHE_CAPACITY`: Document handle cache size (default: `50`)
//! - `REVSTORE_BIG_ATTACHMENT_LENGTH`: Size above which attachments are streamed (default: `16384`)
//! - `REVSTORE_CHANGE_CHANNEL_CAPACITY`: Buffer of the change broadcast channel (default: `1024`)
//! - `REVSTORE_SYNC_ON_COMMIT`: Whether commits fsync the log (default: `true`)
//!
//! # Invariants
//!
//! - `doc_cache_capacity` and `change_channel_capacity` are never zero
//! - `directory` is always a valid path (may not exist yet)

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` or `new()`, every numeric field is
/// within its valid range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory where the store keeps its files.
    /// The commit log lives at `{directory}/revs.log`, blobs under
    /// `{directory}/attachments/`.
    pub directory: PathBuf,
    /// Maximum number of document handles kept in memory.
    pub doc_cache_capacity: NonZeroUsize,
    /// Attachments longer than this are flagged to follow the body instead
    /// of being inlined.
    pub big_attachment_length: u64,
    /// Buffer size of the change broadcast channel.
    pub change_channel_capacity: NonZeroUsize,
    /// Whether every commit is flushed to stable storage before returning.
    pub sync_on_commit: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Default document cache size.
    pub const DEFAULT_DOC_CACHE_CAPACITY: usize = 50;
    /// Default threshold for streamed attachments.
    pub const DEFAULT_BIG_ATTACHMENT_LENGTH: u64 = 16 * 1024;
    /// Default change channel buffer.
    pub const DEFAULT_CHANGE_CHANNEL_CAPACITY: usize = 1024;
    /// File name of the commit log inside the store directory.
    pub const LOG_FILE_NAME: &'static str = "revs.log";
    /// Directory name of the blob store inside the store directory.
    pub const ATTACHMENTS_DIR_NAME: &'static str = "attachments";

    /// Configuration with defaults for everything but the directory.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            doc_cache_capacity: NonZeroUsize::new(Self::DEFAULT_DOC_CACHE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            big_attachment_length: Self::DEFAULT_BIG_ATTACHMENT_LENGTH,
            change_channel_capacity: NonZeroUsize::new(Self::DEFAULT_CHANGE_CHANNEL_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            sync_on_commit: true,
        }
    }

    /// Set the document cache size.
    #[must_use]
    pub fn with_doc_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.doc_cache_capacity = capacity;
        self
    }

    /// Set the streamed attachment threshold.
    #[must_use]
    pub fn with_big_attachment_length(mut self, length: u64) -> Self {
        self.big_attachment_length = length;
        self
    }

    /// Set the change channel buffer.
    #[must_use]
    pub fn with_change_channel_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.change_channel_capacity = capacity;
        self
    }

    /// Set whether commits fsync the log.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Path of the commit log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.directory.join(Self::LOG_FILE_NAME)
    }

    /// Root directory of the blob store.
    #[must_use]
    pub fn attachments_path(&self) -> PathBuf {
        self.directory.join(Self::ATTACHMENTS_DIR_NAME)
    }

    /// The store directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `REVSTORE_DIRECTORY` is not set or is empty
    /// - any optional variable is set but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `from_env()` passes the process environment; tests pass a map.
    ///
    /// # Errors
    ///
    /// Same as [`StoreConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let directory = lookup("REVSTORE_DIRECTORY")
            .ok_or_else(|| ConfigError::MissingEnvVar("REVSTORE_DIRECTORY".to_string()))?;
        if directory.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "REVSTORE_DIRECTORY".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let mut config = Self::new(directory);
        if let Some(value) = lookup("REVSTORE_DOC_CACHE_CAPACITY") {
            config.doc_cache_capacity = parse_non_zero("REVSTORE_DOC_CACHE_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("REVSTORE_BIG_ATTACHMENT_LENGTH") {
            config.big_attachment_length =
                value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    name: "REVSTORE_BIG_ATTACHMENT_LENGTH".to_string(),
                    message: format!("'{value}' is not a valid byte count"),
                })?;
        }
        if let Some(value) = lookup("REVSTORE_CHANGE_CHANNEL_CAPACITY") {
            config.change_channel_capacity =
                parse_non_zero("REVSTORE_CHANGE_CHANNEL_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("REVSTORE_SYNC_ON_COMMIT") {
            config.sync_on_commit = parse_bool("REVSTORE_SYNC_ON_COMMIT", &value)?;
        }

        Ok(config)
    }
}

fn parse_non_zero(name: &str, value: &str) -> Result<NonZeroUsize, ConfigError> {
    value
        .parse::<NonZeroUsize>()
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a positive integer"),
        })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a boolean"),
        }),
    }
}
