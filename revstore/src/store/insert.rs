//! Local edits: `put_revision`.

use crate::storage::{RecordStore, RevisionRow};
use crate::store::attachments::digests;
use crate::store::body::{compute_rev_id, decode_body, encode_body};
use crate::store::history::ContentOptions;
use crate::store::validation::{DEFAULT_REJECTION, ValidationContext, Verdict};
use crate::store::winner::winner_of;
use crate::store::{DocumentStore, StoreError};
use crate::types::{
    Body, DatabaseChange, DocumentEdit, RevId, Revision, Sequence, generate_document_id,
    is_valid_document_id,
};

/// The node a new revision will be a child of.
struct Parent {
    sequence: Sequence,
    rev_id: RevId,
    deleted: bool,
    body: Option<String>,
}

impl Parent {
    #[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
    fn of(row: &RevisionRow) -> Self {
        Self {
            sequence: row.sequence,
            rev_id: row.rev_id.clone(),
            deleted: row.deleted,
            body: row.body.clone(),
        }
    }
}

impl DocumentStore {
    /// Store a new local revision of a document.
    ///
    /// With `prev` the new revision becomes a child of that revision,
    /// which must be a leaf unless `allow_conflict` is set. Without `prev`
    /// the document must not exist, or must currently be deleted, unless
    /// `allow_conflict` is set, in which case a new root is added beside
    /// the existing tree.
    ///
    /// The whole read-validate-write runs in one transaction. On success
    /// the returned revision carries its sequence and a body with `_id`,
    /// `_rev` and attachment stubs; a change is published.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for a missing body, an invalid document id, or a
    ///   malformed attachment declaration.
    /// - `NotFound` if `prev` is unknown, or when deleting a document that
    ///   does not exist.
    /// - `Conflict` if `prev` is not a leaf, or the edit would add a second
    ///   leaf without `allow_conflict`.
    /// - `Forbidden` if a validation rejects the revision.
    /// - `Attachment` if attachment content cannot be resolved.
    pub fn put_revision(
        &self,
        edit: DocumentEdit,
        prev: Option<&RevId>,
        allow_conflict: bool,
    ) -> Result<Revision, StoreError> {
        let mut changes = Vec::new();
        let mut db = self.write()?;
        let revision = db.run_in_transaction(|db| {
            self.put_revision_in(db, edit, prev, allow_conflict, &mut changes)
        })?;
        self.publish(&db, changes);
        drop(db);
        Ok(revision)
    }

    pub(crate) fn put_revision_in(
        &self,
        db: &mut RecordStore,
        edit: DocumentEdit,
        prev: Option<&RevId>,
        allow_conflict: bool,
        changes: &mut Vec<DatabaseChange>,
    ) -> Result<Revision, StoreError> {
        let DocumentEdit {
            doc_id,
            deleted,
            body,
        } = edit;
        if !deleted && body.is_none() {
            return Err(StoreError::bad_request("document body is required"));
        }
        let doc_id = match doc_id {
            Some(doc_id) if is_valid_document_id(&doc_id) => doc_id,
            Some(doc_id) => {
                return Err(StoreError::bad_request(format!(
                    "invalid document id '{doc_id}'"
                )));
            }
            None if prev.is_some() || deleted => {
                return Err(StoreError::bad_request(
                    "a document id is required to update or delete",
                ));
            }
            None => generate_document_id(),
        };

        let parent = find_parent(db, &doc_id, prev, deleted, allow_conflict)?;

        // Tombstones carry neither properties nor attachments.
        let body = if deleted { None } else { body };
        let encoded = body.as_ref().map(encode_body).transpose()?;
        let plan = self.plan_attachments(
            db,
            body.as_ref(),
            parent.as_ref().map(|parent| parent.sequence),
            true,
        )?;
        let rev_id = compute_rev_id(
            parent.as_ref().map(|parent| &parent.rev_id),
            deleted,
            encoded.as_deref(),
            &digests(&plan),
        )?;
        if db
            .doc_key(&doc_id)
            .and_then(|key| db.find_revision(key, &rev_id))
            .is_some()
        {
            return Err(StoreError::conflict(format!(
                "revision {rev_id} of '{doc_id}' already exists"
            )));
        }

        self.validate(&doc_id, &rev_id, deleted, body.as_ref(), parent.as_ref())?;

        let key = db.ensure_document(&doc_id)?;
        let parent_sequence = parent.as_ref().map(|parent| parent.sequence);
        if let Some(parent_sequence) = parent_sequence {
            db.set_current(parent_sequence, false)?;
        }
        #[allow(clippy::disallowed_methods)] // Clone needed: id is stored and returned
        let sequence = db.insert_revision(
            key,
            rev_id.clone(),
            parent_sequence,
            true,
            deleted,
            encoded,
        )?;
        self.link_attachments(db, sequence, rev_id.generation(), plan)?;

        let winner = winner_of(db, key);
        tracing::debug!(
            %doc_id,
            %rev_id,
            sequence,
            deleted,
            "Inserted revision"
        );

        let row = db
            .revision(sequence)
            .ok_or_else(|| StoreError::not_found(format!("sequence {sequence}")))?;
        let expanded = self.expand_row(db, &doc_id, row, &ContentOptions::default())?;
        #[allow(clippy::disallowed_methods)] // Clone needed: id goes into the event and the result
        let revision = Revision::new(&doc_id, rev_id.clone(), deleted).with_sequence(sequence);
        changes.push(DatabaseChange {
            revision: Revision::new(doc_id, rev_id, deleted).with_sequence(sequence),
            sequence,
            winner,
            source: None,
        });
        Ok(revision.with_body(expanded))
    }

    /// Run every registered validation; the first rejection wins.
    fn validate(
        &self,
        doc_id: &str,
        rev_id: &RevId,
        deleted: bool,
        body: Option<&Body>,
        parent: Option<&Parent>,
    ) -> Result<(), StoreError> {
        let validators = self.validators();
        if validators.is_empty() {
            return Ok(());
        }

        #[allow(clippy::disallowed_methods)] // Clone needed: validators see owned revisions
        let candidate = {
            let revision = Revision::new(doc_id, rev_id.clone(), deleted);
            match body {
                Some(body) => revision.with_body(body.clone()),
                None => revision,
            }
        };
        #[allow(clippy::disallowed_methods)] // Clone needed: validators see owned revisions
        let previous = match parent {
            Some(parent) => {
                let mut revision =
                    Revision::new(doc_id, parent.rev_id.clone(), parent.deleted)
                        .with_sequence(parent.sequence);
                if let Some(json) = &parent.body {
                    revision.body = Some(decode_body(json)?);
                }
                Some(revision)
            }
            None => None,
        };

        let context = ValidationContext::new(&candidate, previous.as_ref());
        for (name, validator) in validators {
            if let Verdict::Reject(message) =
                validator.validate(&candidate, previous.as_ref(), &context)
            {
                tracing::debug!(%doc_id, validation = %name, %message, "Validation rejected revision");
                let message = if message.is_empty() {
                    DEFAULT_REJECTION.to_string()
                } else {
                    message
                };
                return Err(StoreError::Forbidden(message));
            }
        }
        Ok(())
    }
}

/// Work out which node the new revision attaches to, enforcing the leaf
/// and conflict rules.
fn find_parent(
    db: &RecordStore,
    doc_id: &str,
    prev: Option<&RevId>,
    deleted: bool,
    allow_conflict: bool,
) -> Result<Option<Parent>, StoreError> {
    let key = db.doc_key(doc_id);

    if let Some(prev) = prev {
        let row = key
            .and_then(|key| db.find_revision(key, prev))
            .ok_or_else(|| {
                StoreError::not_found(format!("revision {prev} of '{doc_id}' not found"))
            })?;
        if !row.current && !allow_conflict {
            return Err(StoreError::conflict(format!(
                "revision {prev} of '{doc_id}' is not a leaf"
            )));
        }
        return Ok(Some(Parent::of(row)));
    }

    let winner = key.and_then(|key| winner_of(db, key));
    match winner {
        Some(winner) if !winner.deleted => {
            if deleted || !allow_conflict {
                return Err(StoreError::conflict(format!(
                    "document '{doc_id}' already exists"
                )));
            }
            Ok(None)
        }
        // A new edit of a deleted document continues from its tombstone.
        Some(winner) if !deleted => Ok(db.revision(winner.sequence).map(Parent::of)),
        _ if deleted => Err(StoreError::not_found(format!(
            "document '{doc_id}' not found"
        ))),
        _ => Ok(None),
    }
}
