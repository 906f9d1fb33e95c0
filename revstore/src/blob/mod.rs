//! Content-addressed blob storage for attachment bodies.
//!
//! Blobs are keyed by the SHA-1 of their content and stored one file per
//! blob under a two-character shard directory:
//!
//! ```text
//! {root}/3f/3fa1...c9.blob
//! {root}/tmp/          in-flight writes
//! ```
//!
//! # Invariants
//!
//! - A blob file's name is the hex encoding of the SHA-1 of its content.
//! - Files only appear under their final name via rename, so a reader
//!   never observes a partially written blob.
//! - Storing the same content twice is a no-op the second time.

mod writer;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::types::ids::hex_string;

pub use writer::BlobWriter;

const EXTENSION: &str = "blob";
const TEMP_DIR: &str = "tmp";
const DIGEST_PREFIX: &str = "sha1-";

/// SHA-1 digest identifying a blob.
///
/// Serialized as its 40-character hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey([u8; 20]);

impl BlobKey {
    /// Compute the key of `data`.
    #[must_use]
    pub fn for_data(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex form, used as the file name.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex_string(&self.0)
    }

    /// Parse the hex form.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 40 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// Digest string as it appears in attachment metadata (`sha1-<base64>`).
    #[must_use]
    pub fn digest_string(&self) -> String {
        format!("{DIGEST_PREFIX}{}", BASE64.encode(self.0))
    }

    /// Parse a digest string produced by [`BlobKey::digest_string`].
    #[must_use]
    pub fn from_digest_string(digest: &str) -> Option<Self> {
        let encoded = digest.strip_prefix(DIGEST_PREFIX)?;
        let decoded = BASE64.decode(encoded).ok()?;
        let bytes: [u8; 20] = decoded.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl TryFrom<String> for BlobKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid blob key '{value}'"))
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.to_hex()
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.to_hex())
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest_string())
    }
}

/// Errors from the blob store.
#[derive(Debug)]
pub enum BlobStoreError {
    /// A filesystem operation failed.
    Io { path: PathBuf, source: io::Error },
    /// No blob is stored under the key.
    NotFound(BlobKey),
}

impl fmt::Display for BlobStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "blob I/O error at {}: {source}", path.display()),
            Self::NotFound(key) => write!(f, "blob {key} not found"),
        }
    }
}

impl std::error::Error for BlobStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::NotFound(_) => None,
        }
    }
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BlobStoreError + '_ {
    move |source| BlobStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Content-addressed file store.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    /// Sum of the sizes of all stored blobs, in bytes.
    disk_usage: AtomicU64,
    /// Serializes placing and removing blob files so `disk_usage` counts
    /// each file once.
    placement: Mutex<()>,
}

impl BlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Leftover temporary files from interrupted writes are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or scanned.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_error(&root))?;

        let temp = root.join(TEMP_DIR);
        if temp.exists() {
            fs::remove_dir_all(&temp).map_err(io_error(&temp))?;
        }
        fs::create_dir_all(&temp).map_err(io_error(&temp))?;

        let store = Self {
            root,
            disk_usage: AtomicU64::new(0),
            placement: Mutex::new(()),
        };
        let mut usage = 0;
        for (_, path) in store.walk()? {
            usage += fs::metadata(&path).map_err(io_error(&path))?.len();
        }
        store.disk_usage.store(usage, Ordering::SeqCst);

        tracing::debug!(root = %store.root.display(), bytes = usage, "Opened blob store");
        Ok(store)
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `data` and return its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn put(&self, data: &[u8]) -> Result<BlobKey, BlobStoreError> {
        let key = BlobKey::for_data(data);
        let path = self.path_for(&key);
        if path.exists() {
            return Ok(key);
        }

        let temp = self.temp_path();
        fs::write(&temp, data).map_err(io_error(&temp))?;
        self.move_into_place(&temp, &key, data.len() as u64)?;
        Ok(key)
    }

    /// Read the content of a blob.
    ///
    /// # Errors
    ///
    /// Returns [`BlobStoreError::NotFound`] if the blob is absent.
    pub fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.path_for(key);
        fs::read(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                BlobStoreError::NotFound(*key)
            } else {
                BlobStoreError::Io { path, source }
            }
        })
    }

    /// Whether a blob is stored under `key`.
    #[must_use]
    pub fn exists(&self, key: &BlobKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Size in bytes of a stored blob.
    ///
    /// # Errors
    ///
    /// Returns [`BlobStoreError::NotFound`] if the blob is absent.
    pub fn size_of(&self, key: &BlobKey) -> Result<u64, BlobStoreError> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(*key))
            }
            Err(source) => Err(BlobStoreError::Io { path, source }),
        }
    }

    /// Filesystem path a blob is (or would be) stored at.
    #[must_use]
    pub fn path_for(&self, key: &BlobKey) -> PathBuf {
        let hex = key.to_hex();
        let mut path = self.root.join(&hex[..2]).join(hex);
        path.set_extension(EXTENSION);
        path
    }

    /// All stored keys, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be read.
    pub fn keys(&self) -> Result<Vec<BlobKey>, BlobStoreError> {
        Ok(self.walk()?.into_iter().map(|(key, _)| key).collect())
    }

    /// Total bytes of stored blobs.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.disk_usage.load(Ordering::SeqCst)
    }

    /// Number of stored blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory tree cannot be read.
    pub fn count(&self) -> Result<usize, BlobStoreError> {
        Ok(self.walk()?.len())
    }

    /// Delete every blob whose key is not in `keep`.
    ///
    /// Returns the number of blobs deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be read or a file cannot be
    /// removed. Blobs deleted before the failure stay deleted.
    #[allow(clippy::significant_drop_tightening)] // Lock held for the whole sweep
    pub fn delete_all_except(&self, keep: &HashSet<BlobKey>) -> Result<usize, BlobStoreError> {
        let _placement = self.placement.lock().unwrap_or_else(PoisonError::into_inner);
        let mut deleted = 0;
        for (key, path) in self.walk()? {
            if keep.contains(&key) {
                continue;
            }
            let size = fs::metadata(&path).map_err(io_error(&path))?.len();
            fs::remove_file(&path).map_err(io_error(&path))?;
            self.disk_usage.fetch_sub(size, Ordering::SeqCst);
            deleted += 1;
        }
        if deleted > 0 {
            tracing::info!(deleted, kept = keep.len(), "Deleted unreferenced blobs");
        }
        Ok(deleted)
    }

    /// Start a streamed write.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn writer(&self) -> Result<BlobWriter, BlobStoreError> {
        BlobWriter::create(self.temp_path())
    }

    /// Move a finished writer's content into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer cannot be flushed or renamed.
    pub fn install(&self, writer: BlobWriter) -> Result<BlobKey, BlobStoreError> {
        let (temp, key, length) = writer.finish()?;
        self.move_into_place(&temp, &key, length)?;
        Ok(key)
    }

    /// Rename `temp` to the blob's path, or discard it if another writer
    /// stored the same content first.
    #[allow(clippy::significant_drop_tightening)] // Lock held across the check and rename
    fn move_into_place(&self, temp: &Path, key: &BlobKey, length: u64) -> Result<(), BlobStoreError> {
        let path = self.path_for(key);
        let _placement = self.placement.lock().unwrap_or_else(PoisonError::into_inner);
        if path.is_file() {
            fs::remove_file(temp).map_err(io_error(temp))?;
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::rename(temp, &path).map_err(io_error(&path))?;
        self.disk_usage.fetch_add(length, Ordering::SeqCst);
        tracing::trace!(key = %key, bytes = length, "Stored blob");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let suffix: u64 = rand::rng().random();
        self.root.join(TEMP_DIR).join(format!("{suffix:016x}.tmp"))
    }

    fn walk(&self) -> Result<Vec<(BlobKey, PathBuf)>, BlobStoreError> {
        let mut found = Vec::new();
        for shard in fs::read_dir(&self.root).map_err(io_error(&self.root))? {
            let shard = shard.map_err(io_error(&self.root))?.path();
            if !shard.is_dir() || shard.file_name().is_some_and(|name| name == TEMP_DIR) {
                continue;
            }
            for entry in fs::read_dir(&shard).map_err(io_error(&shard))? {
                let path = entry.map_err(io_error(&shard))?.path();
                if path.extension().is_none_or(|ext| ext != EXTENSION) {
                    continue;
                }
                let key = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(BlobKey::from_hex);
                if let Some(key) = key {
                    found.push((key, path));
                }
            }
        }
        Ok(found)
    }
}
