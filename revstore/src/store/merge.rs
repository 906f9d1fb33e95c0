//! Replicated revisions: `force_insert`.

use crate::storage::RecordStore;
use crate::store::body::encode_body;
use crate::store::winner::winner_of;
use crate::store::{DocumentStore, StoreError};
use crate::types::{DatabaseChange, RevId, Revision, Sequence, is_valid_document_id};

/// Result of [`DocumentStore::force_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceInsertOutcome {
    /// The leaf was added at `sequence`.
    Inserted { sequence: Sequence },
    /// The leaf was already stored; nothing changed.
    AlreadyPresent,
}

impl DocumentStore {
    /// Add a revision received from elsewhere, together with its ancestry.
    ///
    /// `history` lists revision ids newest first and must start with the
    /// revision's own id; an empty history means the revision has no known
    /// ancestors. Unknown ancestors are stored as body-less placeholders.
    /// No validation runs and no conflict check applies: divergent
    /// branches simply become additional leaves.
    ///
    /// Inserting a revision that is already stored is a no-op.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `history[0]` is not the revision's id, the
    ///   document id is invalid, or the body is malformed.
    /// - `Attachment` if inline attachment content cannot be stored.
    pub fn force_insert(
        &self,
        revision: Revision,
        history: &[RevId],
        source: Option<&str>,
    ) -> Result<ForceInsertOutcome, StoreError> {
        let mut changes = Vec::new();
        let mut db = self.write()?;
        let outcome = db.run_in_transaction(|db| {
            self.force_insert_in(db, revision, history, source, &mut changes)
        })?;
        self.publish(&db, changes);
        drop(db);
        Ok(outcome)
    }

    fn force_insert_in(
        &self,
        db: &mut RecordStore,
        revision: Revision,
        history: &[RevId],
        source: Option<&str>,
        changes: &mut Vec<DatabaseChange>,
    ) -> Result<ForceInsertOutcome, StoreError> {
        let Revision {
            doc_id,
            rev_id,
            deleted,
            body,
            ..
        } = revision;
        if !is_valid_document_id(&doc_id) {
            return Err(StoreError::bad_request(format!(
                "invalid document id '{doc_id}'"
            )));
        }
        #[allow(clippy::disallowed_methods)] // Clone needed: stands in for an empty history
        let own_history = [rev_id.clone()];
        let history = if history.is_empty() {
            &own_history[..]
        } else {
            history
        };
        if history[0] != rev_id {
            return Err(StoreError::bad_request(format!(
                "history of {rev_id} starts with {}",
                history[0]
            )));
        }

        if db
            .doc_key(&doc_id)
            .and_then(|key| db.find_revision(key, &rev_id))
            .is_some()
        {
            tracing::debug!(%doc_id, %rev_id, "Revision already present");
            return Ok(ForceInsertOutcome::AlreadyPresent);
        }

        let body = if deleted { None } else { body };
        let mut encoded = body.as_ref().map(encode_body).transpose()?;
        let key = db.ensure_document(&doc_id)?;

        // Walk oldest to newest. `parent` is the running parent; `local_parent`
        // the newest ancestor that was already stored before this call.
        let mut parent: Option<Sequence> = None;
        let mut local_parent: Option<Sequence> = None;
        let mut leaf_sequence = None;
        let mut placeholders = 0_usize;
        for (index, ancestor) in history.iter().enumerate().rev() {
            if let Some(row) = db.find_revision(key, ancestor) {
                parent = Some(row.sequence);
                local_parent = Some(row.sequence);
                continue;
            }
            #[allow(clippy::disallowed_methods)] // Clone needed: id is stored in the row
            let ancestor = ancestor.clone();
            if index == 0 {
                // Attachments not carried inline come from the nearest local ancestor.
                let plan = self.plan_attachments(db, body.as_ref(), local_parent, false)?;
                let generation = ancestor.generation();
                let sequence =
                    db.insert_revision(key, ancestor, parent, true, deleted, encoded.take())?;
                self.link_attachments(db, sequence, generation, plan)?;
                leaf_sequence = Some(sequence);
            } else {
                parent = Some(db.insert_revision(key, ancestor, parent, false, false, None)?);
                placeholders += 1;
            }
        }

        let Some(sequence) = leaf_sequence else {
            return Ok(ForceInsertOutcome::AlreadyPresent);
        };
        if let Some(local_parent) = local_parent {
            db.set_current(local_parent, false)?;
        }

        let winner = winner_of(db, key);
        tracing::debug!(
            %doc_id,
            %rev_id,
            sequence,
            placeholders,
            source = source.unwrap_or("local"),
            "Merged revision"
        );
        changes.push(DatabaseChange {
            revision: Revision::new(doc_id, rev_id, deleted).with_sequence(sequence),
            sequence,
            winner,
            source: source.map(str::to_string),
        });
        Ok(ForceInsertOutcome::Inserted { sequence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ContentOptions;
    use crate::testing::{TestStore, body};
    use crate::types::DocumentEdit;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;

    fn rev(s: &str) -> RevId {
        s.parse().unwrap()
    }

    fn leaf(doc_id: &str, rev_id: &str) -> Revision {
        Revision::new(doc_id, rev(rev_id), false).with_body(body(json!({"rev": rev_id})))
    }

    #[test]
    fn test_inserts_placeholders_for_unknown_ancestors() {
        let store = TestStore::new();
        let outcome = store
            .force_insert(leaf("doc", "3-c"), &[rev("3-c"), rev("2-b"), rev("1-a")], None)
            .unwrap();
        assert_eq!(outcome, ForceInsertOutcome::Inserted { sequence: 3 });

        let all = store.all_revisions("doc", false).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(store.all_revisions("doc", true).unwrap().len(), 1);

        let placeholder = store
            .get_document("doc", Some(&rev("2-b")), &ContentOptions::default())
            .unwrap_err();
        assert!(matches!(placeholder, StoreError::NotFound(_)));
        let doc = store
            .get_document("doc", None, &ContentOptions::default())
            .unwrap();
        assert_eq!(doc.body.unwrap()["rev"], json!("3-c"));
    }

    #[test]
    fn test_child_of_maximum_generation_is_rejected() {
        let store = TestStore::new();
        let top = RevId::new(u64::MAX, "x").unwrap();
        store
            .force_insert(leaf("doc", &top.to_string()), &[], None)
            .unwrap();

        let err = store
            .put_revision(
                DocumentEdit::new("doc", body(json!({"next": true}))),
                Some(&top),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));

        assert_eq!(store.winning_revision("doc").unwrap().rev_id, top);
        assert_eq!(store.latest_sequence().unwrap(), 1);
        store
            .put_revision(DocumentEdit::new("other", body(json!({}))), None, false)
            .unwrap();
        assert_eq!(store.latest_sequence().unwrap(), 2);
    }

    #[test]
    fn test_history_must_start_with_leaf() {
        let store = TestStore::new();
        let err = store
            .force_insert(leaf("doc", "2-b"), &[rev("2-x"), rev("1-a")], None)
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));
        assert_eq!(store.latest_sequence().unwrap(), 0);
        assert!(store.all_revisions("doc", false).unwrap().is_empty());
    }

    #[test]
    fn test_is_idempotent() {
        let store = TestStore::new();
        let history = [rev("2-b"), rev("1-a")];
        store.force_insert(leaf("doc", "2-b"), &history, None).unwrap();
        let before = store.latest_sequence().unwrap();

        let outcome = store.force_insert(leaf("doc", "2-b"), &history, None).unwrap();
        assert_eq!(outcome, ForceInsertOutcome::AlreadyPresent);
        assert_eq!(store.latest_sequence().unwrap(), before);
        assert_eq!(store.all_revisions("doc", false).unwrap().len(), 2);
    }

    #[test]
    fn test_extends_local_leaf() {
        let store = TestStore::new();
        let local = store
            .put_revision(DocumentEdit::new("doc", body(json!({"v": 1}))), None, false)
            .unwrap();
        let remote = rev("2-remote");
        #[allow(clippy::disallowed_methods)] // Clone needed for the history
        let history = [remote.clone(), local.rev_id.clone()];
        store
            .force_insert(leaf("doc", "2-remote"), &history, Some("http://peer/db"))
            .unwrap();

        let leaves = store.all_revisions("doc", true).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].rev_id, remote);
        assert!(!store.winning_revision("doc").unwrap().conflicted);
    }

    #[test]
    fn test_divergent_branches_stay_current() {
        let store = TestStore::new();
        store
            .force_insert(leaf("doc", "2-a"), &[rev("2-a"), rev("1-root")], None)
            .unwrap();
        store
            .force_insert(leaf("doc", "3-b"), &[rev("3-b"), rev("2-b"), rev("1-root")], None)
            .unwrap();

        let winner = store.winning_revision("doc").unwrap();
        assert_eq!(winner.rev_id, rev("3-b"));
        assert!(winner.conflicted);
        assert_eq!(store.all_revisions("doc", true).unwrap().len(), 2);
    }

    #[test]
    fn test_tombstone_branch_does_not_conflict() {
        let store = TestStore::new();
        store
            .force_insert(leaf("doc", "2-a"), &[rev("2-a"), rev("1-root")], None)
            .unwrap();
        store
            .force_insert(
                Revision::new("doc", rev("3-z"), true),
                &[rev("3-z"), rev("2-z"), rev("1-root")],
                None,
            )
            .unwrap();

        let winner = store.winning_revision("doc").unwrap();
        assert_eq!(winner.rev_id, rev("2-a"));
        assert!(!winner.deleted);
        assert!(!winner.conflicted);
    }

    #[test]
    fn test_empty_history_inserts_root() {
        let store = TestStore::new();
        store.force_insert(leaf("doc", "1-a"), &[], None).unwrap();
        assert_eq!(store.winning_revision("doc").unwrap().rev_id, rev("1-a"));
    }

    #[test]
    fn test_leaf_inherits_attachment_stubs() {
        let store = TestStore::new();
        let local = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"a.txt": {"data": STANDARD.encode(b"shared")}}})),
                ),
                None,
                false,
            )
            .unwrap();
        let remote = Revision::new("doc", rev("2-r"), false).with_body(body(json!({
            "_attachments": {
                "a.txt": {"stub": true, "revpos": 1},
                "gone.txt": {"stub": true, "revpos": 1}
            }
        })));
        #[allow(clippy::disallowed_methods)] // Clone needed for the history
        let history = [rev("2-r"), local.rev_id.clone()];
        let ForceInsertOutcome::Inserted { sequence } =
            store.force_insert(remote, &history, None).unwrap()
        else {
            panic!("expected insert");
        };

        let attachment = store.attachment_for_sequence(sequence, "a.txt").unwrap();
        assert_eq!(attachment.data, b"shared");
        assert!(store.attachment_for_sequence(sequence, "gone.txt").is_err());
    }

    #[tokio::test]
    async fn test_event_carries_source() {
        let store = TestStore::new();
        let mut changes = store.subscribe();
        store
            .force_insert(leaf("doc", "1-a"), &[rev("1-a")], Some("http://peer/db"))
            .unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.source.as_deref(), Some("http://peer/db"));
        assert_eq!(change.sequence, 1);
        assert!(change.is_winner());
    }
}
