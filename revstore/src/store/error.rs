//! Store error taxonomy.

use std::fmt;

use crate::blob::BlobStoreError;
use crate::storage::StorageError;
use crate::types::RevIdError;

/// Broad category of a [`StoreError`], with an HTTP-like status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Attachment,
    Storage,
}

impl ErrorKind {
    /// Status code conventionally reported for this kind.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Attachment => 415,
            Self::Storage => 500,
        }
    }
}

/// Errors returned by [`super::DocumentStore`] operations.
#[derive(Debug)]
pub enum StoreError {
    /// Malformed input.
    BadRequest(String),
    /// A validation callback rejected the revision.
    Forbidden(String),
    /// A referenced document, revision or attachment is absent.
    NotFound(String),
    /// The write would fork history without permission, or collides with
    /// existing state.
    Conflict(String),
    /// Attachment content could not be stored or resolved.
    Attachment(String),
    /// Blob store failure.
    Blob(BlobStoreError),
    /// Record store failure; the transaction was rolled back.
    Storage(StorageError),
}

impl StoreError {
    /// The category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Attachment(_) => ErrorKind::Attachment,
            Self::Blob(BlobStoreError::NotFound(_)) => ErrorKind::NotFound,
            Self::Blob(BlobStoreError::Io { .. }) | Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Shorthand for `self.kind().status_code()`.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(m) => write!(f, "bad request: {m}"),
            Self::Forbidden(m) => write!(f, "forbidden: {m}"),
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::Conflict(m) => write!(f, "conflict: {m}"),
            Self::Attachment(m) => write!(f, "attachment error: {m}"),
            Self::Blob(e) => write!(f, "blob store error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Blob(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<BlobStoreError> for StoreError {
    fn from(e: BlobStoreError) -> Self {
        Self::Blob(e)
    }
}

impl From<RevIdError> for StoreError {
    fn from(e: RevIdError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobKey;

    #[test]
    fn test_kinds_and_status_codes() {
        assert_eq!(StoreError::bad_request("x").status_code(), 400);
        assert_eq!(StoreError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(StoreError::not_found("x").status_code(), 404);
        assert_eq!(StoreError::conflict("x").status_code(), 409);
        assert_eq!(
            StoreError::Blob(BlobStoreError::NotFound(BlobKey::for_data(b""))).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StoreError::Storage(StorageError::LockPoisoned).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::conflict("document update conflict").to_string(),
            "conflict: document update conflict"
        );
    }
}
