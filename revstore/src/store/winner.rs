//! Winner selection among a document's current leaves.

use std::cmp::Ordering;

use crate::storage::{DocKey, RecordStore, RevisionRow};
use crate::store::{DocumentStore, StoreError};
use crate::types::WinningRevision;
use crate::types::ids::descending;

/// Order leaves the way winners are picked: live before deleted, then by
/// revision id descending (generation first, then suffix).
pub(crate) fn winning_order(a: &RevisionRow, b: &RevisionRow) -> Ordering {
    a.deleted
        .cmp(&b.deleted)
        .then_with(|| descending(&a.rev_id, &b.rev_id))
}

/// Current leaves of a document, in winning order.
pub(crate) fn current_leaves(db: &RecordStore, key: DocKey) -> Vec<&RevisionRow> {
    let mut leaves: Vec<&RevisionRow> = db.revisions_of(key).filter(|row| row.current).collect();
    leaves.sort_by(|a, b| winning_order(a, b));
    leaves
}

/// Resolve the winner of the document with numeric key `key`.
///
/// Every leaf is inspected: the document is conflicted iff two or more
/// leaves are live.
#[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
pub(crate) fn winner_of(db: &RecordStore, key: DocKey) -> Option<WinningRevision> {
    let leaves = current_leaves(db, key);
    let live = leaves.iter().filter(|row| !row.deleted).count();
    leaves.first().map(|top| WinningRevision {
        rev_id: top.rev_id.clone(),
        sequence: top.sequence,
        deleted: top.deleted,
        conflicted: live >= 2,
    })
}

impl DocumentStore {
    /// The revision `doc_id` currently resolves to.
    ///
    /// A deleted document still has a winner (its tombstone); only a
    /// document with no revisions at all is `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document has no revisions.
    pub fn winning_revision(&self, doc_id: &str) -> Result<WinningRevision, StoreError> {
        let db = self.read()?;
        db.doc_key(doc_id)
            .and_then(|key| winner_of(&db, key))
            .ok_or_else(|| StoreError::not_found(format!("document '{doc_id}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use crate::types::RevId;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    fn store_with(leaves: &[(&str, bool)]) -> (RecordStore, DocKey) {
        let mut db = RecordStore::in_memory();
        let key = db
            .run_in_transaction(|db| -> Result<DocKey, StorageError> {
                let key = db.ensure_document("doc")?;
                for (rev_id, deleted) in leaves {
                    db.insert_revision(key, rev(rev_id), None, true, *deleted, None)?;
                }
                Ok(key)
            })
            .unwrap();
        (db, key)
    }

    #[test]
    fn test_highest_live_leaf_wins() {
        let (db, key) = store_with(&[("2-aaa", false), ("2-bbb", false), ("3-ccc", true)]);
        let winner = winner_of(&db, key).unwrap();
        assert_eq!(winner.rev_id, rev("2-bbb"));
        assert!(!winner.deleted);
        assert!(winner.conflicted);
    }

    #[test]
    fn test_generation_compares_numerically() {
        let (db, key) = store_with(&[("9-zzz", false), ("10-aaa", false)]);
        assert_eq!(winner_of(&db, key).unwrap().rev_id, rev("10-aaa"));
    }

    #[test]
    fn test_all_deleted_is_deleted_winner() {
        let (db, key) = store_with(&[("2-a", true), ("3-b", true)]);
        let winner = winner_of(&db, key).unwrap();
        assert_eq!(winner.rev_id, rev("3-b"));
        assert!(winner.deleted);
        assert!(!winner.conflicted);
    }

    #[test]
    fn test_single_live_leaf_among_tombstones_not_conflicted() {
        let (db, key) = store_with(&[("2-a", true), ("1-b", false), ("5-c", true)]);
        let winner = winner_of(&db, key).unwrap();
        assert_eq!(winner.rev_id, rev("1-b"));
        assert!(!winner.conflicted);
    }

    #[test]
    fn test_no_leaves() {
        let (db, key) = store_with(&[]);
        assert!(winner_of(&db, key).is_none());
    }
}
