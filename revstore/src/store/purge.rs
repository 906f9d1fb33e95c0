//! Purging revisions from revision trees.
//!
//! Unlike a deletion, a purge leaves nothing behind: the removed
//! revisions, their attachment rows and their place in the change feed
//! are gone. Their sequences are not reused.

use std::collections::{BTreeMap, HashSet};

use crate::storage::{DocKey, RecordStore};
use crate::store::{DocumentStore, StoreError};
use crate::types::{RevId, Sequence};

/// Wildcard that purges every revision of a document.
pub const PURGE_ALL: &str = "*";

/// Revisions of `key` to remove when purging `requested`.
///
/// A requested revision is removed together with every ancestor that is
/// left without a surviving descendant. A requested revision that still
/// has a surviving descendant stays, so no tree loses an interior node.
fn purge_set(db: &RecordStore, key: DocKey, requested: &HashSet<RevId>) -> Vec<Sequence> {
    let mut rows: Vec<_> = db.revisions_of(key).collect();
    // Children always have higher sequences than their parents.
    rows.sort_by(|a, b| b.sequence.cmp(&a.sequence));

    let mut to_purge: HashSet<Sequence> = rows
        .iter()
        .filter(|row| requested.contains(&row.rev_id))
        .map(|row| row.sequence)
        .collect();
    let mut keep: HashSet<Sequence> = HashSet::new();
    let mut purged = Vec::new();
    for row in rows {
        if to_purge.contains(&row.sequence) && !keep.contains(&row.sequence) {
            purged.push(row.sequence);
            if let Some(parent) = row.parent {
                to_purge.insert(parent);
            }
        } else if let Some(parent) = row.parent {
            keep.insert(parent);
        }
    }
    purged
}

impl DocumentStore {
    /// Remove revisions outright.
    ///
    /// `revisions` maps document ids to revision ids; the id `*` selects
    /// every revision of the document. Returns, per requested document,
    /// the ids actually removed. Unknown documents and revisions are
    /// silently skipped.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` for a malformed revision id, or a storage
    /// error if the purge cannot be committed.
    #[allow(clippy::disallowed_methods)] // Clone needed: ids key the result
    pub fn purge_revisions(
        &self,
        revisions: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, Vec<RevId>>, StoreError> {
        let purged = {
            let mut db = self.write()?;
            db.run_in_transaction(|db| -> Result<_, StoreError> {
                let mut purged = BTreeMap::new();
                for (doc_id, rev_ids) in revisions {
                    let removed = Self::purge_document(db, doc_id, rev_ids)?;
                    purged.insert(doc_id.clone(), removed);
                }
                Ok(purged)
            })?
        };

        let mut total = 0;
        for (doc_id, removed) in &purged {
            if !removed.is_empty() {
                self.cache.remove(doc_id);
                total += removed.len();
            }
        }
        tracing::info!(
            documents = purged.len(),
            revisions = total,
            "Purged revisions"
        );
        Ok(purged)
    }

    fn purge_document(
        db: &mut RecordStore,
        doc_id: &str,
        rev_ids: &[String],
    ) -> Result<Vec<RevId>, StoreError> {
        let Some(key) = db.doc_key(doc_id) else {
            return Ok(Vec::new());
        };

        let sequences: Vec<Sequence> = if rev_ids.iter().any(|rev| rev == PURGE_ALL) {
            let mut all: Vec<Sequence> = db.revisions_of(key).map(|row| row.sequence).collect();
            all.reverse();
            all
        } else {
            let requested = rev_ids
                .iter()
                .map(|rev| rev.parse::<RevId>())
                .collect::<Result<HashSet<_>, _>>()?;
            purge_set(db, key, &requested)
        };

        let mut removed = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if let Some(row) = db.revision(sequence) {
                #[allow(clippy::disallowed_methods)] // Clone needed: row is about to be deleted
                removed.push(row.rev_id.clone());
            }
            db.delete_revision(sequence)?;
        }
        tracing::debug!(%doc_id, removed = removed.len(), "Purged document revisions");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestStore, body};
    use crate::types::{DocumentEdit, Revision};
    use serde_json::json;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    fn request(doc_id: &str, revs: &[&str]) -> BTreeMap<String, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert(
            doc_id.to_string(),
            revs.iter().map(|rev| (*rev).to_string()).collect(),
        );
        map
    }

    fn branchy(store: &TestStore) {
        // 1-r -> 2-a -> 3-a
        //     -> 2-b
        for (leaf, history) in [
            ("3-a", vec![rev("3-a"), rev("2-a"), rev("1-r")]),
            ("2-b", vec![rev("2-b"), rev("1-r")]),
        ] {
            store
                .force_insert(
                    Revision::new("doc", rev(leaf), false).with_body(body(json!({}))),
                    &history,
                    None,
                )
                .unwrap();
        }
    }

    #[test]
    fn test_purge_leaf_removes_orphaned_ancestors() {
        let store = TestStore::new();
        branchy(&store);

        let purged = store.purge_revisions(&request("doc", &["3-a"])).unwrap();
        assert_eq!(purged["doc"], vec![rev("3-a"), rev("2-a")]);

        let remaining: Vec<RevId> = store
            .all_revisions("doc", false)
            .unwrap()
            .into_iter()
            .map(|rev| rev.rev_id)
            .collect();
        assert_eq!(remaining, vec![rev("2-b"), rev("1-r")]);
        assert_eq!(store.winning_revision("doc").unwrap().rev_id, rev("2-b"));
    }

    #[test]
    fn test_interior_revision_with_live_descendant_stays() {
        let store = TestStore::new();
        branchy(&store);
        let purged = store.purge_revisions(&request("doc", &["2-a"])).unwrap();
        assert!(purged["doc"].is_empty());
        assert_eq!(store.all_revisions("doc", false).unwrap().len(), 4);
    }

    #[test]
    fn test_purge_everything() {
        let store = TestStore::new();
        branchy(&store);
        let before = store.latest_sequence().unwrap();

        let purged = store.purge_revisions(&request("doc", &["*"])).unwrap();
        assert_eq!(purged["doc"].len(), 4);
        assert!(matches!(
            store.winning_revision("doc"),
            Err(StoreError::NotFound(_))
        ));

        let again = store.purge_revisions(&request("doc", &["*"])).unwrap();
        assert!(again["doc"].is_empty());

        let rev = store
            .put_revision(DocumentEdit::new("doc", body(json!({}))), None, false)
            .unwrap();
        assert_eq!(rev.sequence, Some(before + 1));
    }

    #[test]
    fn test_unknown_document_and_revision() {
        let store = TestStore::new();
        branchy(&store);
        let mut map = request("missing", &["1-a"]);
        map.insert("doc".to_string(), vec!["9-zzz".to_string()]);
        let purged = store.purge_revisions(&map).unwrap();
        assert!(purged["missing"].is_empty());
        assert!(purged["doc"].is_empty());

        let err = store
            .purge_revisions(&request("doc", &["not-a-rev"]))
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
    }
}
