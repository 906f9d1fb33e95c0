//! Reading documents and their revision trees.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::storage::{DocKey, RecordStore, RevisionRow, collate_json};
use crate::store::body::decode_body;
use crate::store::winner::{current_leaves, winner_of};
use crate::store::{DocumentStore, StoreError};
use crate::types::{Body, RevId, Revision, Sequence};

/// What a read adds to or removes from a revision's body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentOptions {
    /// Inline attachment content as base64 `data` instead of stubs.
    pub include_attachments: bool,
    /// With `include_attachments`, mark attachments of at least
    /// `big_attachment_length` bytes `follows` instead of inlining them.
    pub big_attachments_follow: bool,
    /// Add `_conflicts` listing the other live leaves.
    pub include_conflicts: bool,
    /// Add `_revisions` with the revision's ancestry.
    pub include_revs: bool,
    /// Add `_revs_info` with the availability of each ancestor.
    pub include_revs_info: bool,
    /// Add `_local_seq` with the revision's sequence.
    pub include_local_seq: bool,
    /// Return only the `_` metadata, not the stored properties.
    pub no_body: bool,
}

/// Options of [`DocumentStore::all_docs`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllDocsOptions {
    /// Lowest id returned (highest when `descending`), inclusive.
    pub start_key: Option<Value>,
    /// Highest id returned (lowest when `descending`), inclusive.
    pub end_key: Option<Value>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub skip: usize,
    pub include_docs: bool,
    /// Include documents whose winner is a tombstone.
    pub include_deleted: bool,
    /// Return exactly these ids, in this order, instead of a key range.
    pub keys: Option<Vec<String>>,
    pub content: ContentOptions,
}

/// One row of an [`AllDocsResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct AllDocsRow {
    pub id: String,
    pub key: Value,
    /// Winning revision; `None` for a requested key that does not exist.
    pub rev_id: Option<RevId>,
    pub deleted: bool,
    pub doc: Option<Body>,
    /// Set to `not_found` for a requested key that does not exist.
    pub error: Option<String>,
}

/// Result of [`DocumentStore::all_docs`].
#[derive(Debug, Clone, PartialEq)]
pub struct AllDocsResult {
    pub rows: Vec<AllDocsRow>,
    /// Number of non-deleted documents in the store.
    pub total_rows: usize,
    pub offset: usize,
    pub update_seq: Sequence,
}

/// Encode an ancestry (newest first) as a `_revisions` object.
///
/// Consecutive generations compress to `{"start": N, "ids": [suffix, ...]}`.
/// Otherwise `ids` holds full revision ids and `start` is omitted.
#[must_use]
pub fn revision_history_dict(history: &[RevId]) -> Value {
    let Some(first) = history.first() else {
        return serde_json::json!({"ids": []});
    };
    let start = first.generation();
    let consecutive = history
        .iter()
        .zip(0..)
        .all(|(rev, offset)| start.checked_sub(offset) == Some(rev.generation()));

    if consecutive {
        let ids: Vec<Value> = history
            .iter()
            .map(|rev| Value::String(rev.suffix().to_string()))
            .collect();
        serde_json::json!({"start": start, "ids": ids})
    } else {
        let ids: Vec<Value> = history
            .iter()
            .map(|rev| Value::String(rev.to_string()))
            .collect();
        serde_json::json!({"ids": ids})
    }
}

/// Decode a `_revisions` object into an ancestry, newest first.
///
/// # Errors
///
/// Returns `BadRequest` if the object is malformed or a generation would
/// drop below 1.
pub fn parse_revision_history(revisions: &Value) -> Result<Vec<RevId>, StoreError> {
    let malformed = || StoreError::bad_request("malformed _revisions");
    let ids = revisions
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(malformed)?;

    match revisions.get("start") {
        Some(start) => {
            let start = start.as_u64().ok_or_else(malformed)?;
            ids.iter()
                .zip(0..)
                .map(|(id, offset)| -> Result<RevId, StoreError> {
                    let suffix = id.as_str().ok_or_else(malformed)?;
                    let generation = start
                        .checked_sub(offset)
                        .filter(|generation| *generation > 0)
                        .ok_or_else(malformed)?;
                    Ok(RevId::new(generation, suffix)?)
                })
                .collect()
        }
        None => ids
            .iter()
            .map(|id| -> Result<RevId, StoreError> {
                Ok(id.as_str().ok_or_else(malformed)?.parse::<RevId>()?)
            })
            .collect(),
    }
}

/// Rows from `sequence` up to its root, newest first.
pub(crate) fn ancestry(db: &RecordStore, sequence: Sequence) -> Vec<&RevisionRow> {
    let mut rows = Vec::new();
    let mut next = Some(sequence);
    while let Some(current) = next {
        let Some(row) = db.revision(current) else {
            break;
        };
        rows.push(row);
        next = row.parent;
    }
    rows
}

#[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
fn revision_of(doc_id: &str, row: &RevisionRow) -> Revision {
    Revision::new(doc_id, row.rev_id.clone(), row.deleted).with_sequence(row.sequence)
}

fn not_found(doc_id: &str) -> StoreError {
    StoreError::not_found(format!("document '{doc_id}' not found"))
}

impl DocumentStore {
    /// Body of `row` with the `_` metadata `options` asks for.
    pub(crate) fn expand_row(
        &self,
        db: &RecordStore,
        doc_id: &str,
        row: &RevisionRow,
        options: &ContentOptions,
    ) -> Result<Body, StoreError> {
        let mut body = match (&row.body, options.no_body) {
            (Some(json), false) => decode_body(json)?,
            _ => Body::new(),
        };
        body.insert("_id".to_string(), Value::String(doc_id.to_string()));
        body.insert("_rev".to_string(), Value::String(row.rev_id.to_string()));
        if row.deleted {
            body.insert("_deleted".to_string(), Value::Bool(true));
        }
        if let Some(attachments) = self.attachments_dict(db, row.sequence, options)? {
            body.insert("_attachments".to_string(), Value::Object(attachments));
        }
        if options.include_local_seq {
            body.insert("_local_seq".to_string(), Value::from(row.sequence));
        }

        if options.include_revs || options.include_revs_info {
            let history = ancestry(db, row.sequence);
            if options.include_revs {
                #[allow(clippy::disallowed_methods)] // Clone needed to build the ancestry
                let ids: Vec<RevId> = history.iter().map(|row| row.rev_id.clone()).collect();
                body.insert("_revisions".to_string(), revision_history_dict(&ids));
            }
            if options.include_revs_info {
                let info: Vec<Value> = history
                    .iter()
                    .map(|ancestor| {
                        let status = if ancestor.deleted {
                            "deleted"
                        } else if ancestor.body.is_some() {
                            "available"
                        } else {
                            "missing"
                        };
                        serde_json::json!({"rev": ancestor.rev_id.to_string(), "status": status})
                    })
                    .collect();
                body.insert("_revs_info".to_string(), Value::Array(info));
            }
        }

        if options.include_conflicts {
            let conflicts: Vec<Value> = current_leaves(db, row.doc_key)
                .into_iter()
                .filter(|leaf| !leaf.deleted && leaf.sequence != row.sequence)
                .map(|leaf| Value::String(leaf.rev_id.to_string()))
                .collect();
            if !conflicts.is_empty() {
                body.insert("_conflicts".to_string(), Value::Array(conflicts));
            }
        }
        Ok(body)
    }

    /// Load a document at `rev`, or at its winner.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document or revision is missing, if the
    /// winner is deleted (when no `rev` is given) or if the requested
    /// revision's body was compacted away.
    pub fn get_document(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        options: &ContentOptions,
    ) -> Result<Revision, StoreError> {
        let db = self.read()?;
        let key = db.doc_key(doc_id).ok_or_else(|| not_found(doc_id))?;
        let row = match rev {
            Some(rev) => db.find_revision(key, rev).ok_or_else(|| {
                StoreError::not_found(format!("revision {rev} of '{doc_id}' not found"))
            })?,
            None => {
                let winner = winner_of(&db, key).ok_or_else(|| not_found(doc_id))?;
                if winner.deleted {
                    return Err(StoreError::not_found(format!("document '{doc_id}' is deleted")));
                }
                db.revision(winner.sequence).ok_or_else(|| not_found(doc_id))?
            }
        };
        if row.body.is_none() && !row.deleted && !options.no_body {
            return Err(StoreError::not_found(format!(
                "revision {} of '{doc_id}' has no stored body",
                row.rev_id
            )));
        }
        let body = self.expand_row(&db, doc_id, row, options)?;
        Ok(revision_of(doc_id, row).with_body(body))
    }

    /// Fill in the body of `revision` if it was loaded without one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the revision no longer exists.
    pub fn load_revision_body(
        &self,
        mut revision: Revision,
        options: &ContentOptions,
    ) -> Result<Revision, StoreError> {
        if revision.body.is_some() {
            return Ok(revision);
        }
        let db = self.read()?;
        let row = db
            .doc_key(&revision.doc_id)
            .and_then(|key| db.find_revision(key, &revision.rev_id))
            .ok_or_else(|| {
                StoreError::not_found(format!(
                    "revision {} of '{}' not found",
                    revision.rev_id, revision.doc_id
                ))
            })?;
        revision.body = Some(self.expand_row(&db, &revision.doc_id, row, options)?);
        revision.sequence = Some(row.sequence);
        Ok(revision)
    }

    /// Whether `rev_id` of `doc_id` is stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn exists_revision(&self, doc_id: &str, rev_id: &RevId) -> Result<bool, StoreError> {
        let db = self.read()?;
        Ok(db
            .doc_key(doc_id)
            .and_then(|key| db.find_revision(key, rev_id))
            .is_some())
    }

    /// Every stored revision of `doc_id` (or only the leaves), without
    /// bodies, newest sequence first. Unknown documents yield nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn all_revisions(
        &self,
        doc_id: &str,
        only_current: bool,
    ) -> Result<Vec<Revision>, StoreError> {
        let db = self.read()?;
        let Some(key) = db.doc_key(doc_id) else {
            return Ok(Vec::new());
        };
        let mut revisions: Vec<Revision> = db
            .revisions_of(key)
            .filter(|row| !only_current || row.current)
            .map(|row| revision_of(doc_id, row))
            .collect();
        revisions.reverse();
        Ok(revisions)
    }

    /// Ids of every live leaf of `doc_id`, winner first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn conflicting_revision_ids(&self, doc_id: &str) -> Result<Vec<RevId>, StoreError> {
        let db = self.read()?;
        let Some(key) = db.doc_key(doc_id) else {
            return Ok(Vec::new());
        };
        #[allow(clippy::disallowed_methods)] // Clone needed: rows stay in the table
        let ids = current_leaves(&db, key)
            .into_iter()
            .filter(|row| !row.deleted)
            .map(|row| row.rev_id.clone())
            .collect();
        Ok(ids)
    }

    /// Ancestry of `rev_id`, from the revision itself back to its root.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the revision is not stored.
    pub fn revision_history(
        &self,
        doc_id: &str,
        rev_id: &RevId,
    ) -> Result<Vec<Revision>, StoreError> {
        let db = self.read()?;
        let row = db
            .doc_key(doc_id)
            .and_then(|key| db.find_revision(key, rev_id))
            .ok_or_else(|| {
                StoreError::not_found(format!("revision {rev_id} of '{doc_id}' not found"))
            })?;
        Ok(ancestry(&db, row.sequence)
            .into_iter()
            .map(|row| revision_of(doc_id, row))
            .collect())
    }

    /// The newest ancestor of `rev_id` (possibly itself) that appears in
    /// `candidates`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the revision is not stored.
    pub fn find_common_ancestor(
        &self,
        doc_id: &str,
        rev_id: &RevId,
        candidates: &[RevId],
    ) -> Result<Option<RevId>, StoreError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let history = self.revision_history(doc_id, rev_id)?;
        Ok(history
            .into_iter()
            .map(|rev| rev.rev_id)
            .find(|rev| candidates.contains(rev)))
    }

    /// Of the given revisions, those this store does not hold.
    ///
    /// Documents with nothing missing are left out of the result.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    #[allow(clippy::disallowed_methods)] // Clone needed for the owned result
    pub fn find_missing_revisions(
        &self,
        revisions: &BTreeMap<String, Vec<RevId>>,
    ) -> Result<BTreeMap<String, Vec<RevId>>, StoreError> {
        let db = self.read()?;
        let mut missing = BTreeMap::new();
        for (doc_id, rev_ids) in revisions {
            let known: HashSet<&RevId> = db
                .doc_key(doc_id)
                .map(|key| db.revisions_of(key).map(|row| &row.rev_id).collect())
                .unwrap_or_default();
            let absent: Vec<RevId> = rev_ids
                .iter()
                .filter(|rev| !known.contains(rev))
                .cloned()
                .collect();
            if !absent.is_empty() {
                missing.insert(doc_id.clone(), absent);
            }
        }
        Ok(missing)
    }

    /// Number of documents whose winner is not deleted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn document_count(&self) -> Result<usize, StoreError> {
        let db = self.read()?;
        Ok(live_count(&db))
    }

    /// List documents by id.
    ///
    /// # Errors
    ///
    /// Returns an error if a body cannot be decoded or an attachment blob
    /// cannot be read.
    #[allow(clippy::disallowed_methods)] // Clone needed: ids are returned
    pub fn all_docs(&self, options: &AllDocsOptions) -> Result<AllDocsResult, StoreError> {
        let db = self.read()?;
        let mut rows = Vec::new();

        if let Some(keys) = &options.keys {
            for doc_id in keys {
                let entry = db
                    .doc_key(doc_id)
                    .and_then(|key| winner_of(&db, key).map(|winner| (key, winner)));
                match entry {
                    Some((_, winner)) => {
                        rows.push(self.all_docs_row(&db, doc_id, winner.sequence, options)?);
                    }
                    None => rows.push(AllDocsRow {
                        id: doc_id.clone(),
                        key: Value::String(doc_id.clone()),
                        rev_id: None,
                        deleted: false,
                        doc: None,
                        error: Some("not_found".to_string()),
                    }),
                }
            }
        } else {
            let mut documents: Vec<(&str, DocKey)> = db.documents().collect();
            if options.descending {
                documents.reverse();
            }
            let (lower, upper) = if options.descending {
                (&options.end_key, &options.start_key)
            } else {
                (&options.start_key, &options.end_key)
            };

            let mut selected = Vec::new();
            for (doc_id, key) in documents {
                let id = Value::String(doc_id.to_string());
                if lower
                    .as_ref()
                    .is_some_and(|lower| collate_json(&id, lower) == Ordering::Less)
                    || upper
                        .as_ref()
                        .is_some_and(|upper| collate_json(&id, upper) == Ordering::Greater)
                {
                    continue;
                }
                let Some(winner) = winner_of(&db, key) else {
                    continue;
                };
                if winner.deleted && !options.include_deleted {
                    continue;
                }
                selected.push((doc_id, winner.sequence));
            }
            rows = selected
                .into_iter()
                .skip(options.skip)
                .take(options.limit.unwrap_or(usize::MAX))
                .map(|(doc_id, sequence)| self.all_docs_row(&db, doc_id, sequence, options))
                .collect::<Result<_, _>>()?;
        }

        Ok(AllDocsResult {
            rows,
            total_rows: live_count(&db),
            offset: options.skip,
            update_seq: db.last_sequence(),
        })
    }

    #[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
    fn all_docs_row(
        &self,
        db: &RecordStore,
        doc_id: &str,
        sequence: Sequence,
        options: &AllDocsOptions,
    ) -> Result<AllDocsRow, StoreError> {
        let row = db
            .revision(sequence)
            .ok_or_else(|| not_found(doc_id))?;
        let doc = if options.include_docs && !row.deleted {
            Some(self.expand_row(db, doc_id, row, &options.content)?)
        } else {
            None
        };
        Ok(AllDocsRow {
            id: doc_id.to_string(),
            key: Value::String(doc_id.to_string()),
            rev_id: Some(row.rev_id.clone()),
            deleted: row.deleted,
            doc,
            error: None,
        })
    }
}

fn live_count(db: &RecordStore) -> usize {
    db.documents()
        .filter(|(_, key)| winner_of(db, *key).is_some_and(|winner| !winner.deleted))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ForceInsertOutcome;
    use crate::testing::{TestStore, body};
    use crate::types::DocumentEdit;
    use serde_json::json;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    #[test]
    fn test_history_dict_consecutive() {
        let dict = revision_history_dict(&[rev("3-c"), rev("2-b"), rev("1-a")]);
        assert_eq!(dict, json!({"start": 3, "ids": ["c", "b", "a"]}));
        assert_eq!(
            parse_revision_history(&dict).unwrap(),
            vec![rev("3-c"), rev("2-b"), rev("1-a")]
        );
    }

    #[test]
    fn test_history_dict_with_gap() {
        let dict = revision_history_dict(&[rev("5-e"), rev("2-b")]);
        assert_eq!(dict, json!({"ids": ["5-e", "2-b"]}));
        assert_eq!(
            parse_revision_history(&dict).unwrap(),
            vec![rev("5-e"), rev("2-b")]
        );
    }

    #[test]
    fn test_parse_history_rejects_underflow() {
        let err = parse_revision_history(&json!({"start": 1, "ids": ["a", "b"]})).unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
        assert!(parse_revision_history(&json!({"start": 2})).is_err());
    }

    #[test]
    fn test_get_document_with_options() {
        let store = TestStore::new();
        let first = store
            .put_revision(DocumentEdit::new("doc", body(json!({"v": 1}))), None, false)
            .unwrap();
        let second = store
            .put_revision(
                DocumentEdit::new("doc", body(json!({"v": 2}))),
                Some(&first.rev_id),
                false,
            )
            .unwrap();

        let options = ContentOptions {
            include_revs: true,
            include_revs_info: true,
            include_local_seq: true,
            ..ContentOptions::default()
        };
        let doc = store.get_document("doc", None, &options).unwrap();
        let props = doc.body.unwrap();
        assert_eq!(props["v"], json!(2));
        assert_eq!(props["_rev"], json!(second.rev_id.to_string()));
        assert_eq!(props["_local_seq"], json!(2));
        assert_eq!(props["_revisions"]["start"], json!(2));
        assert_eq!(props["_revs_info"][1]["status"], json!("available"));

        let old = store
            .get_document("doc", Some(&first.rev_id), &ContentOptions::default())
            .unwrap();
        assert_eq!(old.body.unwrap()["v"], json!(1));

        let bare = store
            .get_document(
                "doc",
                None,
                &ContentOptions {
                    no_body: true,
                    ..ContentOptions::default()
                },
            )
            .unwrap();
        assert!(!bare.body.unwrap().contains_key("v"));
    }

    #[test]
    fn test_get_deleted_document_is_not_found() {
        let store = TestStore::new();
        let first = store
            .put_revision(DocumentEdit::new("doc", body(json!({}))), None, false)
            .unwrap();
        let tombstone = store
            .put_revision(DocumentEdit::deletion("doc"), Some(&first.rev_id), false)
            .unwrap();

        let err = store
            .get_document("doc", None, &ContentOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let explicit = store
            .get_document("doc", Some(&tombstone.rev_id), &ContentOptions::default())
            .unwrap();
        assert!(explicit.deleted);
        assert_eq!(explicit.body.unwrap()["_deleted"], json!(true));
    }

    #[test]
    fn test_conflicts_and_common_ancestor() {
        let store = TestStore::new();
        let root = store
            .put_revision(DocumentEdit::new("doc", body(json!({"n": 0}))), None, false)
            .unwrap();
        let leaf_a = Revision::new("doc", rev("2-aaa"), false).with_body(body(json!({"n": 1})));
        let leaf_b = Revision::new("doc", rev("2-bbb"), false).with_body(body(json!({"n": 2})));
        for leaf in [leaf_a, leaf_b] {
            #[allow(clippy::disallowed_methods)] // Clone needed for the history
            let history = [leaf.rev_id.clone(), root.rev_id.clone()];
            assert!(matches!(
                store.force_insert(leaf, &history, None).unwrap(),
                ForceInsertOutcome::Inserted { .. }
            ));
        }

        assert_eq!(
            store.conflicting_revision_ids("doc").unwrap(),
            vec![rev("2-bbb"), rev("2-aaa")]
        );
        let doc = store
            .get_document(
                "doc",
                None,
                &ContentOptions {
                    include_conflicts: true,
                    ..ContentOptions::default()
                },
            )
            .unwrap();
        assert_eq!(doc.body.unwrap()["_conflicts"], json!(["2-aaa"]));

        assert_eq!(
            store
                .find_common_ancestor("doc", &rev("2-aaa"), &[root.rev_id.clone(), rev("9-x")])
                .unwrap(),
            Some(root.rev_id.clone())
        );
        assert_eq!(store.revision_history("doc", &rev("2-aaa")).unwrap().len(), 2);
        assert_eq!(store.all_revisions("doc", true).unwrap().len(), 2);
        assert_eq!(store.all_revisions("doc", false).unwrap().len(), 3);
    }

    #[test]
    fn test_find_missing_revisions() {
        let store = TestStore::new();
        let first = store
            .put_revision(DocumentEdit::new("doc", body(json!({}))), None, false)
            .unwrap();
        let mut query = BTreeMap::new();
        query.insert("doc".to_string(), vec![first.rev_id.clone(), rev("2-zzz")]);
        query.insert("other".to_string(), vec![rev("1-abc")]);

        let missing = store.find_missing_revisions(&query).unwrap();
        assert_eq!(missing["doc"], vec![rev("2-zzz")]);
        assert_eq!(missing["other"], vec![rev("1-abc")]);

        query.remove("other");
        query.insert("doc".to_string(), vec![first.rev_id]);
        assert!(store.find_missing_revisions(&query).unwrap().is_empty());
    }

    #[test]
    fn test_all_docs_ranges() {
        let store = TestStore::new();
        for id in ["a", "b", "c", "d"] {
            store
                .put_revision(DocumentEdit::new(id, body(json!({"id": id}))), None, false)
                .unwrap();
        }
        let c = store.winning_revision("c").unwrap();
        store
            .put_revision(DocumentEdit::deletion("c"), Some(&c.rev_id), false)
            .unwrap();

        let ids = |result: AllDocsResult| -> Vec<String> {
            result.rows.into_iter().map(|row| row.id).collect()
        };

        let all = store.all_docs(&AllDocsOptions::default()).unwrap();
        assert_eq!(all.total_rows, 3);
        assert_eq!(all.update_seq, 5);
        assert_eq!(ids(all), vec!["a", "b", "d"]);

        let range = store
            .all_docs(&AllDocsOptions {
                start_key: Some(json!("b")),
                end_key: Some(json!("d")),
                include_deleted: true,
                ..AllDocsOptions::default()
            })
            .unwrap();
        assert_eq!(ids(range), vec!["b", "c", "d"]);

        let descending = store
            .all_docs(&AllDocsOptions {
                descending: true,
                start_key: Some(json!("b")),
                limit: Some(1),
                include_docs: true,
                ..AllDocsOptions::default()
            })
            .unwrap();
        assert_eq!(descending.rows.len(), 1);
        assert_eq!(descending.rows[0].id, "b");
        assert_eq!(descending.rows[0].doc.as_ref().unwrap()["id"], json!("b"));

        let skipped = store
            .all_docs(&AllDocsOptions {
                skip: 1,
                ..AllDocsOptions::default()
            })
            .unwrap();
        assert_eq!(skipped.offset, 1);
        assert_eq!(ids(skipped), vec!["b", "d"]);
    }

    #[test]
    fn test_all_docs_by_keys() {
        let store = TestStore::new();
        store
            .put_revision(DocumentEdit::new("x", body(json!({}))), None, false)
            .unwrap();
        let result = store
            .all_docs(&AllDocsOptions {
                keys: Some(vec!["missing".into(), "x".into()]),
                ..AllDocsOptions::default()
            })
            .unwrap();
        assert_eq!(result.rows[0].error.as_deref(), Some("not_found"));
        assert_eq!(result.rows[1].id, "x");
        assert!(result.rows[1].rev_id.is_some());
        assert_eq!(store.document_count().unwrap(), 1);
    }
}
