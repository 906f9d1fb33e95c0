//! Attachment linking.
//!
//! Attachments are declared in a body's `_attachments` object. Each entry
//! is one of:
//!
//! - inline: `data` holds base64 content, stored in the blob store before
//!   the revision commits;
//! - follows: `follows: true` plus a `digest` naming content registered
//!   beforehand with [`DocumentStore::register_pending_attachment`];
//! - stub: `stub: true`, content unchanged since an ancestor revision.
//!
//! Attachment rows are bound to one revision's sequence. A stub copies the
//! row of the nearest ancestor that has one, keeping its blob key and
//! `revpos`.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::blob::{BlobKey, BlobWriter};
use crate::storage::{AttachmentRow, RecordStore};
use crate::store::body::decode_body;
use crate::store::history::ContentOptions;
use crate::store::{DocumentStore, StoreError};
use crate::types::{
    Attachment, AttachmentEncoding, Body, DatabaseChange, DocumentEdit, RevId, Revision, Sequence,
};

/// Content handed to [`DocumentStore::update_attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentContent {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub encoding: AttachmentEncoding,
}

impl AttachmentContent {
    /// Identity-encoded content.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            content_type,
            encoding: AttachmentEncoding::Identity,
        }
    }
}

/// One `_attachments` entry after resolution against the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAttachment {
    /// Metadata only; content unchanged since `revpos`.
    Stub { digest: String, revpos: u64 },
    /// Content small enough to carry in memory.
    Inline(Vec<u8>),
    /// Content at or above the big-attachment threshold, to be streamed
    /// from this file.
    Follows(PathBuf),
}

#[derive(Debug)]
enum Source {
    Inline(Vec<u8>),
    Pending,
    Inherited,
}

/// An attachment declaration checked against the store, not yet written.
#[derive(Debug)]
pub(crate) struct PlannedAttachment {
    name: String,
    key: BlobKey,
    content_type: Option<String>,
    encoding: AttachmentEncoding,
    length: u64,
    encoded_length: Option<u64>,
    /// Zero means "the generation of the revision being stored".
    revpos: u64,
    source: Source,
}

/// `(name, digest)` pairs folded into a new revision id.
#[allow(clippy::disallowed_methods)] // Clone needed for the owned result
pub(crate) fn digests(plan: &[PlannedAttachment]) -> Vec<(String, String)> {
    let mut digests: Vec<(String, String)> = plan
        .iter()
        .map(|att| (att.name.clone(), att.key.digest_string()))
        .collect();
    digests.sort();
    digests
}

/// Replace content of attachments older than `min_revpos` with stubs.
///
/// An attachment whose `revpos` is below `min_revpos` loses `data` and
/// `follows` and gains `stub: true`. Applying this twice changes nothing.
/// A `min_revpos` of 0 or 1 leaves the body untouched.
pub fn stub_out_attachments(body: &mut Body, min_revpos: u64) {
    if min_revpos <= 1 {
        return;
    }
    let Some(Value::Object(attachments)) = body.get_mut("_attachments") else {
        return;
    };
    for entry in attachments.values_mut() {
        let Value::Object(meta) = entry else {
            continue;
        };
        let revpos = meta.get("revpos").and_then(Value::as_u64).unwrap_or(0);
        if revpos < min_revpos {
            meta.remove("data");
            meta.remove("follows");
            meta.insert("stub".to_string(), Value::Bool(true));
        }
    }
}

fn attachment_error(message: impl Into<String>) -> StoreError {
    StoreError::Attachment(message.into())
}

/// The row for `name` on `sequence` or its nearest ancestor that has one.
fn inherited_row<'a>(
    db: &'a RecordStore,
    mut sequence: Option<Sequence>,
    name: &str,
) -> Option<&'a AttachmentRow> {
    while let Some(current) = sequence {
        if let Some(row) = db.attachment(current, name) {
            return Some(row);
        }
        sequence = db.revision(current).and_then(|row| row.parent);
    }
    None
}

/// Metadata object describing one stored attachment.
#[allow(clippy::disallowed_methods)] // Clone needed to build metadata
fn metadata(row: &AttachmentRow) -> Map<String, Value> {
    let mut meta = Map::new();
    if let Some(content_type) = &row.content_type {
        meta.insert(
            "content_type".to_string(),
            Value::String(content_type.clone()),
        );
    }
    meta.insert(
        "digest".to_string(),
        Value::String(row.key.digest_string()),
    );
    meta.insert("length".to_string(), Value::from(row.length));
    meta.insert("revpos".to_string(), Value::from(row.revpos));
    if let Some(encoding) = row.encoding.name() {
        meta.insert("encoding".to_string(), Value::String(encoding.to_string()));
        if let Some(encoded_length) = row.encoded_length {
            meta.insert("encoded_length".to_string(), Value::from(encoded_length));
        }
    }
    meta
}

impl DocumentStore {
    /// Check the `_attachments` of `body` and work out every row the new
    /// revision will carry. Nothing is written.
    ///
    /// `parent` is the sequence stubs are resolved against. With
    /// `require_stubs` an unresolvable stub is `NotFound`; otherwise it is
    /// skipped with a warning.
    pub(crate) fn plan_attachments(
        &self,
        db: &RecordStore,
        body: Option<&Body>,
        parent: Option<Sequence>,
        require_stubs: bool,
    ) -> Result<Vec<PlannedAttachment>, StoreError> {
        let Some(declared) = body.and_then(|body| body.get("_attachments")) else {
            return Ok(Vec::new());
        };
        let Value::Object(declared) = declared else {
            return Err(StoreError::bad_request("_attachments must be an object"));
        };

        let mut plan = Vec::with_capacity(declared.len());
        for (name, entry) in declared {
            let Value::Object(meta) = entry else {
                return Err(StoreError::bad_request(format!(
                    "attachment '{name}' must be an object"
                )));
            };
            if let Some(planned) = self.plan_one(db, name, meta, parent, require_stubs)? {
                plan.push(planned);
            }
        }
        Ok(plan)
    }

    #[allow(clippy::disallowed_methods)] // Clone needed: inherited metadata is copied
    fn plan_one(
        &self,
        db: &RecordStore,
        name: &str,
        meta: &Map<String, Value>,
        parent: Option<Sequence>,
        require_stubs: bool,
    ) -> Result<Option<PlannedAttachment>, StoreError> {
        let flag = |key: &str| meta.get(key).and_then(Value::as_bool).unwrap_or(false);
        let encoding = AttachmentEncoding::parse(meta.get("encoding").and_then(Value::as_str))
            .ok_or_else(|| {
                attachment_error(format!("attachment '{name}' has an unknown encoding"))
            })?;
        let content_type = meta
            .get("content_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let declared_digest = meta.get("digest").and_then(Value::as_str);
        let declared_length = meta.get("length").and_then(Value::as_u64);
        let revpos = meta.get("revpos").and_then(Value::as_u64).unwrap_or(0);

        if let Some(data) = meta.get("data") {
            let data = data
                .as_str()
                .ok_or_else(|| {
                    StoreError::bad_request(format!("attachment '{name}' data must be a string"))
                })?;
            let data = STANDARD
                .decode(data)
                .map_err(|e| {
                    StoreError::bad_request(format!("attachment '{name}' is not valid base64: {e}"))
                })?;
            let key = BlobKey::for_data(&data);
            if let Some(digest) = declared_digest.filter(|digest| *digest != key.digest_string()) {
                return Err(attachment_error(format!(
                    "attachment '{name}' digest {digest} does not match its content"
                )));
            }
            let stored_length = data.len() as u64;
            let (length, encoded_length) = match encoding {
                AttachmentEncoding::Identity => (stored_length, None),
                AttachmentEncoding::Gzip => (
                    declared_length.unwrap_or(stored_length),
                    Some(stored_length),
                ),
            };
            return Ok(Some(PlannedAttachment {
                name: name.to_string(),
                key,
                content_type,
                encoding,
                length,
                encoded_length,
                revpos,
                source: Source::Inline(data),
            }));
        }

        if flag("follows") {
            let key = declared_digest
                .and_then(BlobKey::from_digest_string)
                .ok_or_else(|| {
                    attachment_error(format!("attachment '{name}' follows without a valid digest"))
                })?;
            let stored_length = {
                let pending = self
                    .pending_attachments
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match pending.get(&key) {
                    Some(writer) => writer.length(),
                    None if self.blobs.exists(&key) => self.blobs.size_of(&key)?,
                    None => {
                        return Err(attachment_error(format!(
                            "no pending content registered for attachment '{name}' ({})",
                            key.digest_string()
                        )));
                    }
                }
            };
            let (length, encoded_length) = match encoding {
                AttachmentEncoding::Identity => (stored_length, None),
                AttachmentEncoding::Gzip => (
                    declared_length.unwrap_or(stored_length),
                    Some(stored_length),
                ),
            };
            return Ok(Some(PlannedAttachment {
                name: name.to_string(),
                key,
                content_type,
                encoding,
                length,
                encoded_length,
                revpos,
                source: Source::Pending,
            }));
        }

        if flag("stub") {
            if revpos == 0 {
                return Err(StoreError::bad_request(format!(
                    "attachment stub '{name}' needs a positive revpos"
                )));
            }
            let Some(row) = inherited_row(db, parent, name) else {
                if require_stubs {
                    return Err(StoreError::not_found(format!(
                        "attachment stub '{name}' has no stored content"
                    )));
                }
                tracing::warn!(attachment = %name, "Skipping stub with no stored content");
                return Ok(None);
            };
            return Ok(Some(PlannedAttachment {
                name: name.to_string(),
                key: row.key,
                content_type: row.content_type.clone(),
                encoding: row.encoding,
                length: row.length,
                encoded_length: row.encoded_length,
                revpos: row.revpos,
                source: Source::Inherited,
            }));
        }

        Err(StoreError::bad_request(format!(
            "attachment '{name}' has neither data, follows nor stub"
        )))
    }

    /// Store planned content and bind the rows to `sequence`.
    pub(crate) fn link_attachments(
        &self,
        db: &mut RecordStore,
        sequence: Sequence,
        generation: u64,
        plan: Vec<PlannedAttachment>,
    ) -> Result<(), StoreError> {
        for planned in plan {
            match planned.source {
                Source::Inline(data) => {
                    self.blobs.put(&data)?;
                }
                Source::Pending => self.install_pending(&planned.key)?,
                Source::Inherited => {}
            }

            let revpos = if planned.revpos == 0 {
                generation
            } else if planned.revpos > generation {
                tracing::warn!(
                    attachment = %planned.name,
                    revpos = planned.revpos,
                    generation,
                    "Attachment revpos is newer than its revision, clamping"
                );
                generation
            } else {
                planned.revpos
            };

            db.insert_attachment(AttachmentRow {
                sequence,
                name: planned.name,
                key: planned.key,
                content_type: planned.content_type,
                length: planned.length,
                encoding: planned.encoding,
                encoded_length: planned.encoded_length,
                revpos,
            })?;
        }
        Ok(())
    }

    fn install_pending(&self, key: &BlobKey) -> Result<(), StoreError> {
        let writer = self
            .pending_attachments
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
        match writer {
            Some(writer) => {
                self.blobs.install(writer)?;
                Ok(())
            }
            None if self.blobs.exists(key) => Ok(()),
            None => Err(attachment_error(format!(
                "pending content {} disappeared before commit",
                key.digest_string()
            ))),
        }
    }

    /// `_attachments` object for the revision at `sequence`, or `None`
    /// if it has no attachments.
    #[allow(clippy::disallowed_methods)] // Clone needed: names key the dict
    pub(crate) fn attachments_dict(
        &self,
        db: &RecordStore,
        sequence: Sequence,
        options: &ContentOptions,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        let mut dict = Map::new();
        for row in db.attachments_of(sequence) {
            let mut meta = metadata(row);
            if options.include_attachments {
                if options.big_attachments_follow && row.length >= self.config.big_attachment_length
                {
                    meta.insert("follows".to_string(), Value::Bool(true));
                } else {
                    let data = self.blobs.get(&row.key)?;
                    meta.insert("data".to_string(), Value::String(STANDARD.encode(data)));
                }
            } else {
                meta.insert("stub".to_string(), Value::Bool(true));
            }
            dict.insert(row.name.clone(), Value::Object(meta));
        }
        Ok((!dict.is_empty()).then_some(dict))
    }

    /// Resolve each entry of a body's `_attachments` against the blob store.
    ///
    /// Stubs stay metadata. Entries naming a stored digest are fetched, or
    /// point at the blob file when at least `big_attachment_length` long.
    /// Inline `data` is decoded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a digest the blob store does not hold and
    /// `BadRequest` for malformed entries.
    #[allow(clippy::disallowed_methods)] // Clone needed: names key the result
    pub fn resolve_attachments(
        &self,
        body: &Body,
    ) -> Result<BTreeMap<String, ResolvedAttachment>, StoreError> {
        let mut resolved = BTreeMap::new();
        let Some(Value::Object(attachments)) = body.get("_attachments") else {
            return Ok(resolved);
        };
        for (name, entry) in attachments {
            let Value::Object(meta) = entry else {
                return Err(StoreError::bad_request(format!(
                    "attachment '{name}' must be an object"
                )));
            };
            let digest = meta.get("digest").and_then(Value::as_str);
            let resolution = if meta.get("stub").and_then(Value::as_bool).unwrap_or(false) {
                ResolvedAttachment::Stub {
                    digest: digest.unwrap_or_default().to_string(),
                    revpos: meta.get("revpos").and_then(Value::as_u64).unwrap_or(0),
                }
            } else if let Some(data) = meta.get("data").and_then(Value::as_str) {
                ResolvedAttachment::Inline(STANDARD.decode(data).map_err(|e| {
                    StoreError::bad_request(format!("attachment '{name}' is not valid base64: {e}"))
                })?)
            } else {
                let key = digest
                    .and_then(BlobKey::from_digest_string)
                    .ok_or_else(|| {
                        StoreError::bad_request(format!("attachment '{name}' has no digest"))
                    })?;
                if self.blobs.size_of(&key)? >= self.config.big_attachment_length {
                    ResolvedAttachment::Follows(self.blobs.path_for(&key))
                } else {
                    ResolvedAttachment::Inline(self.blobs.get(&key)?)
                }
            };
            resolved.insert(name.clone(), resolution);
        }
        Ok(resolved)
    }

    /// Create a new revision that adds, replaces or (with `None`) removes
    /// one attachment of `doc_id`, leaving everything else unchanged.
    ///
    /// Without `prev` the document must not exist yet (or be deleted); the
    /// new revision then carries only this attachment.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `prev` is unknown, or removing an absent attachment.
    /// - `Conflict` if `prev` is not a leaf.
    /// - Any error of [`DocumentStore::put_revision`].
    pub fn update_attachment(
        &self,
        name: &str,
        content: Option<AttachmentContent>,
        doc_id: &str,
        prev: Option<&RevId>,
    ) -> Result<Revision, StoreError> {
        if name.is_empty() {
            return Err(StoreError::bad_request("attachment name must not be empty"));
        }
        let mut changes: Vec<DatabaseChange> = Vec::new();
        let revision = {
            let mut db = self.write()?;
            let revision = db.run_in_transaction(|db| -> Result<Revision, StoreError> {
                let mut body = Body::new();
                let mut attachments = Map::new();
                if let Some(prev) = prev {
                    let row = db
                        .doc_key(doc_id)
                        .and_then(|key| db.find_revision(key, prev))
                        .ok_or_else(|| {
                            StoreError::not_found(format!("revision {prev} of '{doc_id}' not found"))
                        })?;
                    if let Some(json) = &row.body {
                        body = decode_body(json)?;
                    }
                    attachments = self
                        .attachments_dict(db, row.sequence, &ContentOptions::default())?
                        .unwrap_or_default();
                }

                match content {
                    Some(content) => {
                        let mut meta = Map::new();
                        let data = STANDARD.encode(&content.data);
                        meta.insert("data".to_string(), Value::String(data));
                        if let Some(content_type) = content.content_type {
                            meta.insert("content_type".to_string(), Value::String(content_type));
                        }
                        if let Some(encoding) = content.encoding.name() {
                            let encoding = Value::String(encoding.to_string());
                            meta.insert("encoding".to_string(), encoding);
                        }
                        attachments.insert(name.to_string(), Value::Object(meta));
                    }
                    None => {
                        if attachments.remove(name).is_none() {
                            return Err(StoreError::not_found(format!(
                                "attachment '{name}' of '{doc_id}' not found"
                            )));
                        }
                    }
                }
                if !attachments.is_empty() {
                    body.insert("_attachments".to_string(), Value::Object(attachments));
                }

                let edit = DocumentEdit::new(doc_id, body);
                self.put_revision_in(db, edit, prev, false, &mut changes)
            })?;
            self.publish(&db, changes);
            revision
        };
        Ok(revision)
    }

    /// Content of attachment `name` of the revision at `sequence`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the revision has no such attachment or its
    /// blob is missing.
    #[allow(clippy::disallowed_methods)] // Clone needed: row stays in the table
    pub fn attachment_for_sequence(
        &self,
        sequence: Sequence,
        name: &str,
    ) -> Result<Attachment, StoreError> {
        let row = {
            let db = self.read()?;
            db.attachment(sequence, name).cloned().ok_or_else(|| {
                StoreError::not_found(format!(
                    "attachment '{name}' of sequence {sequence} not found"
                ))
            })?
        };
        let data = self.blobs.get(&row.key)?;
        Ok(Attachment {
            name: row.name,
            content_type: row.content_type,
            encoding: row.encoding,
            data,
        })
    }

    /// File holding attachment `name` of the revision at `sequence`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the revision has no such attachment.
    pub fn attachment_path_for_sequence(
        &self,
        sequence: Sequence,
        name: &str,
    ) -> Result<PathBuf, StoreError> {
        let db = self.read()?;
        db.attachment(sequence, name)
            .map(|row| self.blobs.path_for(&row.key))
            .ok_or_else(|| {
                StoreError::not_found(format!(
                    "attachment '{name}' of sequence {sequence} not found"
                ))
            })
    }

    /// Attachment `name` of `doc_id` at `rev`, or at the winner.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document, revision or attachment is
    /// missing.
    pub fn get_attachment(
        &self,
        doc_id: &str,
        rev: Option<&RevId>,
        name: &str,
    ) -> Result<Attachment, StoreError> {
        let sequence = {
            let db = self.read()?;
            let key = db
                .doc_key(doc_id)
                .ok_or_else(|| StoreError::not_found(format!("document '{doc_id}' not found")))?;
            match rev {
                Some(rev) => db.find_revision(key, rev).map(|row| row.sequence),
                None => crate::store::winner::winner_of(&db, key)
                    .filter(|winner| !winner.deleted)
                    .map(|winner| winner.sequence),
            }
            .ok_or_else(|| StoreError::not_found(format!("revision of '{doc_id}' not found")))?
        };
        self.attachment_for_sequence(sequence, name)
    }

    /// Start streaming attachment content.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn attachment_writer(&self) -> Result<BlobWriter, StoreError> {
        Ok(self.blobs.writer()?)
    }

    /// Hold `writer` until a revision references its digest with
    /// `follows: true`. Returns the digest to reference.
    pub fn register_pending_attachment(&self, writer: BlobWriter) -> String {
        let key = writer.key();
        tracing::debug!(digest = %key, bytes = writer.length(), "Registered pending attachment");
        self.pending_attachments
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, writer);
        key.digest_string()
    }

    /// Delete every blob no attachment row references.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob store cannot be swept.
    pub fn garbage_collect_attachments(&self) -> Result<usize, StoreError> {
        let db = self.read()?;
        self.sweep_blobs(&db)
    }

    pub(crate) fn sweep_blobs(&self, db: &RecordStore) -> Result<usize, StoreError> {
        let keep: HashSet<BlobKey> = db.referenced_blob_keys();
        let deleted = self.blobs.delete_all_except(&keep)?;
        tracing::info!(kept = keep.len(), deleted, "Swept attachment blobs");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::testing::{TestStore, body};
    use serde_json::json;

    #[test]
    fn test_stub_out_is_idempotent() {
        let mut doc = body(json!({
            "_attachments": {
                "old.txt": {"data": "aGk=", "revpos": 1},
                "new.txt": {"data": "aGk=", "revpos": 3},
                "big.bin": {"follows": true, "revpos": 2}
            }
        }));
        stub_out_attachments(&mut doc, 3);
        let once = doc.clone();
        stub_out_attachments(&mut doc, 3);
        assert_eq!(doc, once);

        let attachments = doc["_attachments"].as_object().unwrap();
        assert_eq!(attachments["old.txt"], json!({"revpos": 1, "stub": true}));
        assert_eq!(attachments["big.bin"], json!({"revpos": 2, "stub": true}));
        assert_eq!(attachments["new.txt"]["data"], json!("aGk="));
    }

    #[test]
    fn test_stub_out_below_two_is_noop() {
        let mut doc = body(json!({"_attachments": {"a": {"data": "aGk=", "revpos": 0}}}));
        let before = doc.clone();
        stub_out_attachments(&mut doc, 1);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_inline_attachment_round_trip() {
        let store = TestStore::new();
        let rev = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"hello.txt": {
                        "data": STANDARD.encode(b"hello world"),
                        "content_type": "text/plain"
                    }}})),
                ),
                None,
                false,
            )
            .unwrap();

        let attachment = store.get_attachment("doc", None, "hello.txt").unwrap();
        assert_eq!(attachment.data, b"hello world");
        assert_eq!(attachment.content_type.as_deref(), Some("text/plain"));

        let meta = &rev.attachments().unwrap()["hello.txt"];
        assert_eq!(meta["stub"], json!(true));
        assert_eq!(meta["revpos"], json!(1));
        assert_eq!(meta["length"], json!(11));
        assert_eq!(
            meta["digest"],
            json!(BlobKey::for_data(b"hello world").digest_string())
        );
    }

    #[test]
    fn test_digest_mismatch_is_attachment_error() {
        let store = TestStore::new();
        let err = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"a": {
                        "data": STANDARD.encode(b"abc"),
                        "digest": "sha1-AAAAAAAAAAAAAAAAAAAAAAAAAAA="
                    }}})),
                ),
                None,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Attachment(_)));
        assert!(store.winning_revision("doc").is_err());
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let store = TestStore::new();
        let err = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"a": {"data": "aGk=", "encoding": "brotli"}}})),
                ),
                None,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Attachment(_)));
    }

    #[test]
    fn test_stub_inherits_parent_row() {
        let store = TestStore::new();
        let first = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"a.txt": {"data": STANDARD.encode(b"one")}}})),
                ),
                None,
                false,
            )
            .unwrap();
        let second = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"x": 1, "_attachments": {"a.txt": {"stub": true, "revpos": 1}}})),
                ),
                Some(&first.rev_id),
                false,
            )
            .unwrap();
        let meta = &second.attachments().unwrap()["a.txt"];
        assert_eq!(meta["revpos"], json!(1));
        let data = store
            .attachment_for_sequence(second.sequence.unwrap(), "a.txt")
            .unwrap()
            .data;
        assert_eq!(data, b"one");
    }

    #[test]
    fn test_stub_without_ancestor_content_is_not_found() {
        let store = TestStore::new();
        let err = store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"a.txt": {"stub": true, "revpos": 1}}})),
                ),
                None,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_follows_requires_registration() {
        let store = TestStore::new();
        let digest = BlobKey::for_data(b"streamed").digest_string();
        let edit = |digest: &str| {
            DocumentEdit::new(
                "doc",
                body(json!({"_attachments": {"s.bin": {"follows": true, "digest": digest}}})),
            )
        };
        let err = store.put_revision(edit(&digest), None, false).unwrap_err();
        assert!(matches!(err, StoreError::Attachment(_)));

        let mut writer = store.attachment_writer().unwrap();
        writer.write_all(b"streamed").unwrap();
        assert_eq!(store.register_pending_attachment(writer), digest);

        let rev = store.put_revision(edit(&digest), None, false).unwrap();
        let attachment = store
            .attachment_for_sequence(rev.sequence.unwrap(), "s.bin")
            .unwrap();
        assert_eq!(attachment.data, b"streamed");
    }

    #[test]
    fn test_update_attachment_add_and_remove() {
        let store = TestStore::new();
        let first = store
            .put_revision(DocumentEdit::new("doc", body(json!({"k": "v"}))), None, false)
            .unwrap();
        let second = store
            .update_attachment(
                "a.txt",
                Some(AttachmentContent::new(b"content".to_vec(), Some("text/plain".into()))),
                "doc",
                Some(&first.rev_id),
            )
            .unwrap();
        assert_eq!(second.generation(), 2);
        assert_eq!(second.property("k"), Some(&json!("v")));
        assert_eq!(second.attachments().unwrap()["a.txt"]["revpos"], json!(2));

        let err = store
            .update_attachment("missing", None, "doc", Some(&second.rev_id))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let third = store
            .update_attachment("a.txt", None, "doc", Some(&second.rev_id))
            .unwrap();
        assert!(third.attachments().is_none());
        assert!(store.get_attachment("doc", None, "a.txt").is_err());
        assert!(store.get_attachment("doc", Some(&second.rev_id), "a.txt").is_ok());
    }

    #[test]
    fn test_resolve_attachments() {
        let store = TestStore::with_config(|config| config.with_big_attachment_length(8));
        let small = store.blob_store().put(b"tiny").unwrap();
        let big = store.blob_store().put(b"a much larger payload").unwrap();
        let doc = body(json!({"_attachments": {
            "stub": {"stub": true, "digest": "sha1-x", "revpos": 2},
            "inline": {"data": STANDARD.encode(b"inline")},
            "small": {"digest": small.digest_string()},
            "big": {"digest": big.digest_string()}
        }}));

        let resolved = store.resolve_attachments(&doc).unwrap();
        assert_eq!(
            resolved["stub"],
            ResolvedAttachment::Stub {
                digest: "sha1-x".into(),
                revpos: 2
            }
        );
        assert_eq!(resolved["inline"], ResolvedAttachment::Inline(b"inline".to_vec()));
        assert_eq!(resolved["small"], ResolvedAttachment::Inline(b"tiny".to_vec()));
        assert_eq!(
            resolved["big"],
            ResolvedAttachment::Follows(store.blob_store().path_for(&big))
        );
    }

    #[test]
    fn test_garbage_collect_keeps_referenced() {
        let store = TestStore::new();
        store
            .put_revision(
                DocumentEdit::new(
                    "doc",
                    body(json!({"_attachments": {"a": {"data": STANDARD.encode(b"kept")}}})),
                ),
                None,
                false,
            )
            .unwrap();
        let orphan = store.blob_store().put(b"orphan").unwrap();

        assert_eq!(store.garbage_collect_attachments().unwrap(), 1);
        assert!(!store.blob_store().exists(&orphan));
        assert!(store.blob_store().exists(&BlobKey::for_data(b"kept")));
    }
}
