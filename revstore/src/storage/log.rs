//! Append-only commit log.
//!
//! Each committed transaction is written as one frame:
//!
//! ```text
//! +---------+----------------------------------------------+
//! | 0-3     | payload_length (4 bytes, little endian)      |
//! | 4-7     | CRC32 of the payload (4 bytes, little endian)|
//! | 8-N     | payload: JSON array of ops                   |
//! +---------+----------------------------------------------+
//! ```
//!
//! # Recovery
//!
//! On open every frame is read and verified. A frame that is incomplete
//! or whose checksum does not match marks a torn write: the file is
//! truncated at that frame's start and everything before it is replayed.
//! A transaction is therefore either entirely present or entirely absent.

// Frame lengths are bounded by MAX_FRAME_LENGTH, which fits in u32.
#![allow(clippy::cast_possible_truncation)]

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::storage::StorageError;
use crate::storage::records::Op;

/// Frame header: length (4) + checksum (4).
const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a single frame may carry.
const MAX_FRAME_LENGTH: usize = u32::MAX as usize;

/// Ops per frame when rewriting the log from a snapshot.
const SNAPSHOT_CHUNK: usize = 4096;

/// Result of reading the log at open.
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of intact frames read.
    pub frames_replayed: usize,
    /// Number of ops across those frames.
    pub operations_replayed: usize,
    /// Bytes discarded from a torn tail.
    pub truncated_bytes: u64,
}

/// Handle to the open log file.
#[derive(Debug)]
pub struct CommitLog {
    path: PathBuf,
    file: File,
    sync_on_commit: bool,
    /// Bytes covered by committed frames.
    length: u64,
    /// Set when a failed append may have left bytes past `length`.
    dirty_tail: bool,
}

/// Encode one frame.
///
/// # Errors
///
/// Returns an error if the ops cannot be serialized or exceed the maximum
/// frame size.
pub fn encode_frame(ops: &[Op]) -> Result<Vec<u8>, StorageError> {
    let payload = serde_json::to_vec(ops)?;
    if payload.len() > MAX_FRAME_LENGTH {
        return Err(StorageError::FrameTooLarge(payload.len()));
    }
    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode every intact frame at the start of `bytes`.
///
/// Returns the decoded batches and the number of bytes they span. Decoding
/// stops at the first incomplete or corrupt frame.
///
/// # Errors
///
/// Returns an error if a frame passes its checksum but does not contain a
/// valid op list, which indicates a format mismatch rather than a torn
/// write.
pub fn decode_frames(bytes: &[u8]) -> Result<(Vec<Vec<Op>>, usize), StorageError> {
    let mut batches = Vec::new();
    let mut offset = 0;

    while bytes.len() - offset >= FRAME_HEADER_SIZE {
        let header = &bytes[offset..offset + FRAME_HEADER_SIZE];
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + FRAME_HEADER_SIZE;
        let Some(end) = start.checked_add(length).filter(|end| *end <= bytes.len()) else {
            break;
        };
        let payload = &bytes[start..end];
        if crc32fast::hash(payload) != checksum {
            break;
        }

        let ops: Vec<Op> = serde_json::from_slice(payload).map_err(|e| StorageError::CorruptLog {
            offset: offset as u64,
            reason: e.to_string(),
        })?;
        batches.push(ops);
        offset = end;
    }

    Ok((batches, offset))
}

impl CommitLog {
    /// Open (creating if needed) the log at `path` and read its content.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if an intact frame cannot be
    /// decoded.
    pub fn open(
        path: impl Into<PathBuf>,
        sync_on_commit: bool,
    ) -> Result<(Self, Vec<Vec<Op>>, RecoveryResult), StorageError> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (batches, valid) = decode_frames(&bytes)?;
        let mut result = RecoveryResult {
            frames_replayed: batches.len(),
            operations_replayed: batches.iter().map(Vec::len).sum(),
            truncated_bytes: 0,
        };

        if valid < bytes.len() {
            result.truncated_bytes = (bytes.len() - valid) as u64;
            tracing::warn!(
                path = %path.display(),
                valid_bytes = valid,
                discarded_bytes = result.truncated_bytes,
                "Truncating torn tail of commit log"
            );
            file.set_len(valid as u64)?;
            file.sync_all()?;
        }

        Ok((
            Self {
                path,
                file,
                sync_on_commit,
                length: valid as u64,
                dirty_tail: false,
            },
            batches,
            result,
        ))
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the log in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.length
    }

    /// Whether nothing has been logged.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Append one committed transaction.
    ///
    /// # Post-conditions
    ///
    /// When `sync_on_commit` is set, the frame is on stable storage when
    /// this returns `Ok`. When this returns `Err`, no part of the frame
    /// remains in the log: a partial write is cut off before returning, or
    /// before the next append if that cut fails too.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded or written.
    pub fn append(&mut self, ops: &[Op]) -> Result<(), StorageError> {
        let frame = encode_frame(ops)?;
        if self.dirty_tail {
            self.truncate_to_committed()?;
        }
        if let Err(e) = self.write_frame(&frame) {
            self.discard_partial_frame();
            return Err(e.into());
        }
        self.length += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.file.write_all(frame)?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn discard_partial_frame(&mut self) {
        self.dirty_tail = true;
        if let Err(e) = self.truncate_to_committed() {
            tracing::warn!(
                path = %self.path.display(),
                committed_bytes = self.length,
                error = %e,
                "Could not cut partial frame; retrying on next append"
            );
        }
    }

    /// Drop everything past the last committed frame. The file is in
    /// append mode, so the next write lands right after it.
    fn truncate_to_committed(&mut self) -> Result<(), StorageError> {
        self.file.set_len(self.length)?;
        if self.sync_on_commit {
            self.file.sync_all()?;
        }
        self.dirty_tail = false;
        Ok(())
    }

    /// Replace the log with one that replays to the same state.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; the old log is kept in that case.
    pub fn rewrite(&mut self, snapshot: &[Op]) -> Result<(), StorageError> {
        let temp = self.path.with_extension("log.compact");
        let mut length = 0;
        {
            let mut out = File::create(&temp)?;
            for chunk in snapshot.chunks(SNAPSHOT_CHUNK) {
                let frame = encode_frame(chunk)?;
                out.write_all(&frame)?;
                length += frame.len() as u64;
            }
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.dirty_tail = false;
        let previous = std::mem::replace(&mut self.length, length);
        tracing::info!(
            path = %self.path.display(),
            previous_bytes = previous,
            bytes = length,
            "Rewrote commit log"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn info(key: &str) -> Op {
        Op::SetInfo {
            key: key.to_string(),
            value: "v".to_string(),
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = encode_frame(&[info("a"), info("b")]).unwrap();
        let (batches, consumed) = decode_frames(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(batches, vec![vec![info("a"), info("b")]]);
    }

    #[test]
    fn test_decode_stops_at_checksum_mismatch() {
        let mut bytes = encode_frame(&[info("a")]).unwrap();
        let first = bytes.len();
        let mut second = encode_frame(&[info("b")]).unwrap();
        let last = second.len() - 1;
        second[last] ^= 0xff;
        bytes.extend_from_slice(&second);

        let (batches, consumed) = decode_frames(&bytes).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(consumed, first);
    }

    #[test]
    fn test_open_truncates_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut log, batches, _) = CommitLog::open(&path, true).unwrap();
            assert!(batches.is_empty());
            log.append(&[info("a")]).unwrap();
            log.append(&[info("b")]).unwrap();
        }
        let full = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();

        let (log, batches, result) = CommitLog::open(&path, true).unwrap();
        assert_eq!(batches, vec![vec![info("a")]]);
        assert_eq!(result.frames_replayed, 1);
        assert!(result.truncated_bytes > 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), log.len());
    }

    #[test]
    fn test_rewrite_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut log, _, _) = CommitLog::open(&path, false).unwrap();
            for i in 0..10 {
                log.append(&[info(&format!("k{i}"))]).unwrap();
            }
            log.rewrite(&[info("only")]).unwrap();
            log.append(&[info("after")]).unwrap();
        }
        let (_, batches, _) = CommitLog::open(&path, false).unwrap();
        assert_eq!(batches, vec![vec![info("only")], vec![info("after")]]);
    }

    #[test]
    fn test_partial_frame_is_cut_before_next_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut log, _, _) = CommitLog::open(&path, true).unwrap();
            log.append(&[info("a")]).unwrap();
            let committed = log.len();

            // A write that died halfway through its frame.
            let frame = encode_frame(&[info("lost")]).unwrap();
            log.file.write_all(&frame[..frame.len() / 2]).unwrap();
            log.discard_partial_frame();
            assert!(!log.dirty_tail);
            assert_eq!(fs::metadata(&path).unwrap().len(), committed);

            log.append(&[info("b")]).unwrap();
        }
        let (_, batches, result) = CommitLog::open(&path, true).unwrap();
        assert_eq!(batches, vec![vec![info("a")], vec![info("b")]]);
        assert_eq!(result.truncated_bytes, 0);
    }

    #[test]
    fn test_dirty_tail_is_cut_on_next_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut log, _, _) = CommitLog::open(&path, false).unwrap();
            log.append(&[info("a")]).unwrap();
            log.file.write_all(&[0x2a, 0x00, 0x00]).unwrap();
            log.dirty_tail = true;

            log.append(&[info("b")]).unwrap();
            assert_eq!(fs::metadata(&path).unwrap().len(), log.len());
        }
        let (_, batches, _) = CommitLog::open(&path, false).unwrap();
        assert_eq!(batches, vec![vec![info("a")], vec![info("b")]]);
    }
}
