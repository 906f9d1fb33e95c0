//! The record store: tables, nested transactions and the commit log.
//!
//! # Transactions
//!
//! Transactions nest. Only the outermost `end` commits: it appends the
//! transaction's ops to the log as a single frame. If any level ends with
//! failure the whole outer transaction is marked rollback-only, and the
//! outermost `end` undoes every op applied since the outermost `begin`.
//!
//! Mutations are applied to the tables immediately, so reads inside a
//! transaction see its own writes.

use std::collections::HashSet;
use std::path::Path;

use crate::blob::BlobKey;
use crate::storage::StorageError;
use crate::storage::log::{CommitLog, RecoveryResult};
use crate::storage::records::{
    AttachmentRow, DocKey, LocalDocRow, Op, RevisionRow, Tables,
};
use crate::types::{RevId, Sequence};

/// Tables plus transaction state and an optional commit log.
#[derive(Debug, Default)]
pub struct RecordStore {
    tables: Tables,
    log: Option<CommitLog>,
    depth: u32,
    rollback_only: bool,
    pending: Vec<Op>,
    undo: Vec<Op>,
    /// `last_sequence` and `last_doc_key` at the outermost `begin`.
    counters_at_begin: (Sequence, DocKey),
}

impl RecordStore {
    /// A store that keeps nothing on disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the log at `path`, replaying every committed transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or a replayed op does
    /// not apply cleanly.
    pub fn open(path: &Path, sync_on_commit: bool) -> Result<(Self, RecoveryResult), StorageError> {
        let (log, batches, result) = CommitLog::open(path, sync_on_commit)?;
        let mut tables = Tables::default();
        for op in batches.into_iter().flatten() {
            tables.apply(op)?;
        }

        tracing::info!(
            path = %path.display(),
            frames = result.frames_replayed,
            operations = result.operations_replayed,
            last_sequence = tables.last_sequence,
            "Recovered record store"
        );

        Ok((
            Self {
                tables,
                log: Some(log),
                ..Self::default()
            },
            result,
        ))
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Enter a (possibly nested) transaction.
    pub const fn begin(&mut self) {
        if self.depth == 0 {
            self.counters_at_begin = (self.tables.last_sequence, self.tables.last_doc_key);
        }
        self.depth += 1;
    }

    /// Whether a transaction is open.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    /// Leave the innermost transaction.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NoTransaction`] if none is open.
    /// - [`StorageError::RolledBack`] if `commit` is requested at the
    ///   outermost level but an inner level failed.
    /// - Any log write error; the transaction is rolled back in that case.
    pub fn end(&mut self, commit: bool) -> Result<(), StorageError> {
        if self.depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        if !commit {
            self.rollback_only = true;
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(());
        }

        if self.rollback_only {
            self.rollback();
            return if commit {
                Err(StorageError::RolledBack)
            } else {
                Ok(())
            };
        }

        if !self.pending.is_empty() {
            if let Some(log) = self.log.as_mut() {
                if let Err(e) = log.append(&self.pending) {
                    tracing::warn!(error = %e, "Commit log append failed, rolling back");
                    self.rollback();
                    return Err(e);
                }
            }
            tracing::trace!(operations = self.pending.len(), "Committed transaction");
        }
        self.pending.clear();
        self.undo.clear();
        Ok(())
    }

    /// Run `f` inside a transaction, committing if it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error (after rolling back), or a storage error from
    /// committing.
    pub fn run_in_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StorageError>,
    {
        self.begin();
        match f(self) {
            Ok(value) => {
                self.end(true)?;
                Ok(value)
            }
            Err(e) => {
                self.end(false)?;
                Err(e)
            }
        }
    }

    fn rollback(&mut self) {
        let undone = self.undo.len();
        while let Some(inverse) = self.undo.pop() {
            if let Err(e) = self.tables.apply(inverse) {
                tracing::warn!(error = %e, "Undo op failed during rollback");
            }
        }
        // Undoing an insert removes the row but leaves the counters raised.
        (self.tables.last_sequence, self.tables.last_doc_key) = self.counters_at_begin;
        self.pending.clear();
        self.rollback_only = false;
        tracing::debug!(operations = undone, "Rolled back transaction");
    }

    fn record(&mut self, op: Op) -> Result<(), StorageError> {
        if self.depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        #[allow(clippy::disallowed_methods)] // Clone needed: applied and logged
        let inverse = self.tables.apply(op.clone())?;
        self.pending.push(op);
        self.undo.push(inverse);
        Ok(())
    }

    /// Rewrite the log from the current tables.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionActive`] inside a transaction, or
    /// an I/O error from writing the new log.
    pub fn compact_log(&mut self) -> Result<(), StorageError> {
        if self.depth > 0 {
            return Err(StorageError::TransactionActive);
        }
        if let Some(log) = self.log.as_mut() {
            log.rewrite(&self.tables.snapshot())?;
        }
        Ok(())
    }

    /// Size of the commit log in bytes (zero when in memory).
    #[must_use]
    pub fn log_len(&self) -> u64 {
        self.log.as_ref().map_or(0, CommitLog::len)
    }

    // =========================================================================
    // Mutations (require an open transaction)
    // =========================================================================

    /// Key of `doc_id`, inserting a document row if needed.
    pub fn ensure_document(&mut self, doc_id: &str) -> Result<DocKey, StorageError> {
        if let Some(key) = self.doc_key(doc_id) {
            return Ok(key);
        }
        let key = self.tables.last_doc_key + 1;
        self.record(Op::InsertDocument {
            key,
            doc_id: doc_id.to_string(),
        })?;
        Ok(key)
    }

    /// Insert a tree node and return its newly assigned sequence.
    pub fn insert_revision(
        &mut self,
        doc_key: DocKey,
        rev_id: RevId,
        parent: Option<Sequence>,
        current: bool,
        deleted: bool,
        body: Option<String>,
    ) -> Result<Sequence, StorageError> {
        let sequence = self.tables.last_sequence + 1;
        self.record(Op::InsertRevision(RevisionRow {
            sequence,
            doc_key,
            rev_id,
            parent,
            current,
            deleted,
            body,
        }))?;
        Ok(sequence)
    }

    pub fn set_current(&mut self, sequence: Sequence, current: bool) -> Result<(), StorageError> {
        if self
            .revision(sequence)
            .is_some_and(|row| row.current == current)
        {
            return Ok(());
        }
        self.record(Op::SetCurrent { sequence, current })
    }

    pub fn set_body(&mut self, sequence: Sequence, body: Option<String>) -> Result<(), StorageError> {
        self.record(Op::SetBody { sequence, body })
    }

    /// Delete a tree node together with its attachment rows.
    #[allow(clippy::disallowed_methods)] // Clone needed: names outlive the borrow
    pub fn delete_revision(&mut self, sequence: Sequence) -> Result<(), StorageError> {
        let names: Vec<String> = self
            .attachments_of(sequence)
            .map(|row| row.name.clone())
            .collect();
        for name in names {
            self.record(Op::DeleteAttachment { sequence, name })?;
        }
        self.record(Op::DeleteRevision { sequence })
    }

    pub fn insert_attachment(&mut self, row: AttachmentRow) -> Result<(), StorageError> {
        self.record(Op::InsertAttachment(row))
    }

    pub fn delete_attachment(&mut self, sequence: Sequence, name: &str) -> Result<(), StorageError> {
        self.record(Op::DeleteAttachment {
            sequence,
            name: name.to_string(),
        })
    }

    pub fn put_local(&mut self, row: LocalDocRow) -> Result<(), StorageError> {
        self.record(Op::PutLocal(row))
    }

    pub fn delete_local(&mut self, doc_id: &str) -> Result<(), StorageError> {
        self.record(Op::DeleteLocal {
            doc_id: doc_id.to_string(),
        })
    }

    pub fn set_info(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.record(Op::SetInfo {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[must_use]
    pub fn doc_key(&self, doc_id: &str) -> Option<DocKey> {
        self.tables.docs.get(doc_id).copied()
    }

    #[must_use]
    pub fn doc_id(&self, key: DocKey) -> Option<&str> {
        self.tables.doc_ids.get(&key).map(String::as_str)
    }

    /// All documents, ordered by id.
    pub fn documents(&self) -> impl DoubleEndedIterator<Item = (&str, DocKey)> {
        self.tables
            .docs
            .iter()
            .map(|(doc_id, key)| (doc_id.as_str(), *key))
    }

    #[must_use]
    pub fn revision(&self, sequence: Sequence) -> Option<&RevisionRow> {
        self.tables.revisions.get(&sequence)
    }

    /// Every node of a document's tree, in sequence order.
    pub fn revisions_of(&self, key: DocKey) -> impl Iterator<Item = &RevisionRow> {
        self.tables
            .by_doc
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|sequence| self.tables.revisions.get(sequence))
    }

    /// The node of a document with the given revision id.
    #[must_use]
    pub fn find_revision(&self, key: DocKey, rev_id: &RevId) -> Option<&RevisionRow> {
        self.revisions_of(key).find(|row| &row.rev_id == rev_id)
    }

    /// Every node with a sequence greater than `since`, in sequence order.
    pub fn revisions_since(&self, since: Sequence) -> impl Iterator<Item = &RevisionRow> {
        self.tables
            .revisions
            .range(since.saturating_add(1)..)
            .map(|(_, row)| row)
    }

    /// Every node, in sequence order.
    pub fn all_revisions(&self) -> impl Iterator<Item = &RevisionRow> {
        self.tables.revisions.values()
    }

    /// Attachment rows of one revision, ordered by name.
    pub fn attachments_of(&self, sequence: Sequence) -> impl Iterator<Item = &AttachmentRow> {
        self.tables
            .attachments
            .range((sequence, String::new())..)
            .take_while(move |((seq, _), _)| *seq == sequence)
            .map(|(_, row)| row)
    }

    #[must_use]
    pub fn attachment(&self, sequence: Sequence, name: &str) -> Option<&AttachmentRow> {
        self.tables.attachments.get(&(sequence, name.to_string()))
    }

    /// Every attachment row.
    pub fn all_attachments(&self) -> impl Iterator<Item = &AttachmentRow> {
        self.tables.attachments.values()
    }

    /// Blob keys referenced by any attachment row.
    #[must_use]
    pub fn referenced_blob_keys(&self) -> HashSet<BlobKey> {
        self.tables.attachments.values().map(|row| row.key).collect()
    }

    #[must_use]
    pub fn local(&self, doc_id: &str) -> Option<&LocalDocRow> {
        self.tables.local_docs.get(doc_id)
    }

    #[must_use]
    pub fn info(&self, key: &str) -> Option<&str> {
        self.tables.info.get(key).map(String::as_str)
    }

    /// Highest sequence ever assigned (zero if none).
    #[must_use]
    pub const fn last_sequence(&self) -> Sequence {
        self.tables.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    #[test]
    fn test_mutation_outside_transaction_fails() {
        let mut store = RecordStore::in_memory();
        assert!(matches!(
            store.ensure_document("a"),
            Err(StorageError::NoTransaction)
        ));
        assert!(matches!(store.end(true), Err(StorageError::NoTransaction)));
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut store, _) = RecordStore::open(&path, true).unwrap();
            store
                .run_in_transaction(|db| -> Result<(), StorageError> {
                    let key = db.ensure_document("doc")?;
                    db.insert_revision(key, rev("1-a"), None, true, false, Some("{}".into()))?;
                    Ok(())
                })
                .unwrap();
        }

        let (store, result) = RecordStore::open(&path, true).unwrap();
        assert_eq!(result.frames_replayed, 1);
        let key = store.doc_key("doc").unwrap();
        let rows: Vec<_> = store.revisions_of(key).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rev_id, rev("1-a"));
        assert_eq!(store.last_sequence(), 1);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let mut store = RecordStore::in_memory();
        let result: Result<(), StorageError> = store.run_in_transaction(|db| {
            let key = db.ensure_document("doc")?;
            db.insert_revision(key, rev("1-a"), None, true, false, None)?;
            Err(StorageError::RolledBack)
        });
        assert!(result.is_err());
        assert!(store.doc_key("doc").is_none());
        assert_eq!(store.all_revisions().count(), 0);
        assert!(!store.in_transaction());
        assert_eq!(store.last_sequence(), 0);
    }

    #[test]
    fn test_rollback_restores_sequence_counter() {
        let mut store = RecordStore::in_memory();
        store
            .run_in_transaction(|db| -> Result<(), StorageError> {
                let key = db.ensure_document("doc")?;
                db.insert_revision(key, rev("1-a"), None, true, false, None)?;
                Ok(())
            })
            .unwrap();

        let failed: Result<(), StorageError> = store.run_in_transaction(|db| {
            let key = db.ensure_document("other")?;
            db.insert_revision(key, rev("1-b"), None, true, false, None)?;
            db.insert_revision(key, rev("2-b"), Some(2), true, false, None)?;
            Err(StorageError::RolledBack)
        });
        assert!(failed.is_err());
        assert_eq!(store.last_sequence(), 1);

        store
            .run_in_transaction(|db| -> Result<(), StorageError> {
                let key = db.ensure_document("other")?;
                assert_eq!(key, 2);
                assert_eq!(db.insert_revision(key, rev("1-c"), None, true, false, None)?, 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_inner_failure_poisons_outer_commit() {
        let mut store = RecordStore::in_memory();
        store.begin();
        store.ensure_document("outer").unwrap();

        store.begin();
        store.ensure_document("inner").unwrap();
        store.end(false).unwrap();

        assert!(matches!(store.end(true), Err(StorageError::RolledBack)));
        assert!(store.doc_key("outer").is_none());
        assert!(store.doc_key("inner").is_none());
    }

    #[test]
    fn test_nested_commit_is_single_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut store, _) = RecordStore::open(&path, false).unwrap();
            store.begin();
            store.ensure_document("a").unwrap();
            store.begin();
            store.ensure_document("b").unwrap();
            store.end(true).unwrap();
            store.end(true).unwrap();
        }
        let (store, result) = RecordStore::open(&path, false).unwrap();
        assert_eq!(result.frames_replayed, 1);
        assert_eq!(store.documents().count(), 2);
    }

    #[test]
    fn test_delete_revision_cascades_attachments() {
        let mut store = RecordStore::in_memory();
        store
            .run_in_transaction(|db| -> Result<(), StorageError> {
                let key = db.ensure_document("doc")?;
                let seq = db.insert_revision(key, rev("1-a"), None, true, false, None)?;
                db.insert_attachment(AttachmentRow {
                    sequence: seq,
                    name: "a.txt".into(),
                    key: BlobKey::for_data(b"x"),
                    content_type: None,
                    length: 1,
                    encoding: crate::types::AttachmentEncoding::Identity,
                    encoded_length: None,
                    revpos: 1,
                })?;
                db.delete_revision(seq)
            })
            .unwrap();
        assert_eq!(store.all_attachments().count(), 0);
        assert_eq!(store.last_sequence(), 1);
    }

    #[test]
    fn test_compact_log_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("revs.log");
        {
            let (mut store, _) = RecordStore::open(&path, false).unwrap();
            for i in 0..5 {
                store
                    .run_in_transaction(|db| -> Result<(), StorageError> {
                        let key = db.ensure_document("doc")?;
                        db.insert_revision(key, rev(&format!("{}-a", i + 1)), None, true, false, None)?;
                        Ok(())
                    })
                    .unwrap();
            }
            store
                .run_in_transaction(|db| db.delete_revision(5))
                .unwrap();
            store.compact_log().unwrap();
        }
        let (store, result) = RecordStore::open(&path, false).unwrap();
        assert_eq!(result.frames_replayed, 1);
        assert_eq!(store.all_revisions().count(), 4);
        assert_eq!(store.last_sequence(), 5);
    }
}
