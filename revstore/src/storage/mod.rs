//! Record storage engine.
//!
//! Tables live in memory and every committed transaction is appended to a
//! checksummed commit log, which is replayed on open.
//!
//! # Files
//!
//! - `{directory}/revs.log`: the commit log (see [`log`])
//!
//! # Usage
//!
//! ```ignore
//! let (mut db, _) = RecordStore::open(&path, true)?;
//! db.run_in_transaction(|db| {
//!     let key = db.ensure_document("doc")?;
//!     db.insert_revision(key, rev_id, None, true, false, Some(body))?;
//!     Ok::<_, StorageError>(())
//! })?;
//! ```

pub mod collate;
mod database;
pub mod log;
pub mod records;

pub use collate::collate_json;
pub use database::RecordStore;
pub use log::RecoveryResult;
pub use records::{AttachmentRow, DocKey, LocalDocRow, RevisionRow};

/// Errors from the storage engine.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error on the commit log.
    Io(std::io::Error),
    /// Serialization of a log frame failed.
    Serialization(serde_json::Error),
    /// An intact log frame could not be decoded.
    CorruptLog { offset: u64, reason: String },
    /// A frame exceeded the maximum size.
    FrameTooLarge(usize),
    /// An op targeted a row that does not exist.
    MissingRow(String),
    /// An op would have duplicated a unique row.
    DuplicateRow(String),
    /// A mutation or `end` was attempted with no open transaction.
    NoTransaction,
    /// An operation that needs quiescence ran inside a transaction.
    TransactionActive,
    /// Commit was requested but the transaction was marked rollback-only.
    RolledBack,
    /// A lock guarding the store was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::CorruptLog { offset, reason } => {
                write!(f, "corrupt commit log frame at offset {offset}: {reason}")
            }
            Self::FrameTooLarge(size) => write!(f, "log frame too large: {size} bytes"),
            Self::MissingRow(what) => write!(f, "missing row: {what}"),
            Self::DuplicateRow(what) => write!(f, "duplicate row: {what}"),
            Self::NoTransaction => write!(f, "no transaction is open"),
            Self::TransactionActive => write!(f, "a transaction is open"),
            Self::RolledBack => write!(f, "transaction was rolled back"),
            Self::LockPoisoned => write!(f, "lock poisoned"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}
