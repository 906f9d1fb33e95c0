//! Streamed blob writes.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use sha1::{Digest, Sha1};

use super::{BlobKey, BlobStoreError, io_error};

/// Accumulates content into a temporary file while hashing it.
///
/// A writer is installed into the store with [`super::BlobStore::install`];
/// until then its content is invisible to readers. A writer that is dropped
/// without being installed leaves a temp file that the next `open` removes.
#[derive(Debug)]
pub struct BlobWriter {
    path: PathBuf,
    file: BufWriter<File>,
    hasher: Sha1,
    length: u64,
}

impl BlobWriter {
    pub(super) fn create(path: PathBuf) -> Result<Self, BlobStoreError> {
        let file = File::create(&path).map_err(io_error(&path))?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
            hasher: Sha1::new(),
            length: 0,
        })
    }

    /// Number of bytes written so far.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Key the content written so far would be stored under.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Clone needed: hashing continues after the peek
    pub fn key(&self) -> BlobKey {
        BlobKey::from_bytes(self.hasher.clone().finalize().into())
    }

    /// Flush and hand back the temp path, final key and length.
    pub(super) fn finish(mut self) -> Result<(PathBuf, BlobKey, u64), BlobStoreError> {
        self.file.flush().map_err(io_error(&self.path))?;
        let key = BlobKey::from_bytes(self.hasher.finalize().into());
        Ok((self.path, key, self.length))
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.length += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
