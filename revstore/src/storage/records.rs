//! Table rows and the mutation operations applied to them.
//!
//! Every change to the tables is expressed as an [`Op`]. Applying an op
//! returns its inverse, which the transaction layer keeps for rollback;
//! committed ops are what the commit log persists and what recovery
//! replays.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::blob::BlobKey;
use crate::storage::StorageError;
use crate::types::{AttachmentEncoding, RevId, Sequence};

/// Numeric key of a document row.
pub type DocKey = u64;

/// One node of a revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::disallowed_methods)] // Clone needed for undo records
pub struct RevisionRow {
    pub sequence: Sequence,
    pub doc_key: DocKey,
    pub rev_id: RevId,
    /// Sequence of the parent node; `None` for a tree root.
    pub parent: Option<Sequence>,
    /// Whether this node is a leaf.
    pub current: bool,
    pub deleted: bool,
    /// Serialized JSON body with all `_` properties stripped. `None` for
    /// tombstones, ancestors known only by id, and pruned revisions.
    pub body: Option<String>,
}

/// Attachment metadata bound to one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::disallowed_methods)] // Clone needed for undo records
pub struct AttachmentRow {
    pub sequence: Sequence,
    pub name: String,
    pub key: BlobKey,
    pub content_type: Option<String>,
    /// Decoded length as declared.
    pub length: u64,
    pub encoding: AttachmentEncoding,
    /// Stored length when `encoding` is not identity.
    pub encoded_length: Option<u64>,
    /// Generation at which this content was introduced.
    pub revpos: u64,
}

/// A non-versioned local document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::disallowed_methods)] // Clone needed for undo records
pub struct LocalDocRow {
    pub doc_id: String,
    pub tag: RevId,
    pub body: String,
}

/// A single logged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
#[allow(clippy::disallowed_methods)] // Clone needed: applied and logged
pub enum Op {
    InsertDocument { key: DocKey, doc_id: String },
    RemoveDocument { key: DocKey },
    InsertRevision(RevisionRow),
    DeleteRevision { sequence: Sequence },
    SetCurrent { sequence: Sequence, current: bool },
    SetBody { sequence: Sequence, body: Option<String> },
    InsertAttachment(AttachmentRow),
    DeleteAttachment { sequence: Sequence, name: String },
    PutLocal(LocalDocRow),
    DeleteLocal { doc_id: String },
    SetInfo { key: String, value: String },
    RemoveInfo { key: String },
    SetLastSequence { sequence: Sequence },
}

/// In-memory tables.
///
/// # Invariants
///
/// - `docs` and `doc_ids` are inverse maps.
/// - `by_doc[k]` holds exactly the sequences of rows with `doc_key == k`.
/// - `last_sequence >= ` every sequence ever inserted.
#[derive(Debug, Default)]
pub struct Tables {
    pub(crate) docs: BTreeMap<String, DocKey>,
    pub(crate) doc_ids: HashMap<DocKey, String>,
    pub(crate) revisions: BTreeMap<Sequence, RevisionRow>,
    pub(crate) by_doc: HashMap<DocKey, BTreeSet<Sequence>>,
    pub(crate) attachments: BTreeMap<(Sequence, String), AttachmentRow>,
    pub(crate) local_docs: BTreeMap<String, LocalDocRow>,
    pub(crate) info: BTreeMap<String, String>,
    pub(crate) last_sequence: Sequence,
    pub(crate) last_doc_key: DocKey,
}

impl Tables {
    /// Apply `op` and return the op that undoes it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingRow`] if the op targets a row that
    /// does not exist, or [`StorageError::DuplicateRow`] if it would
    /// overwrite one that must be unique. The tables are unchanged on error.
    #[allow(clippy::disallowed_methods)] // Clone needed: keys are stored and logged
    pub fn apply(&mut self, op: Op) -> Result<Op, StorageError> {
        match op {
            Op::InsertDocument { key, doc_id } => {
                if self.docs.contains_key(&doc_id) || self.doc_ids.contains_key(&key) {
                    return Err(StorageError::DuplicateRow(format!("document {doc_id}")));
                }
                self.docs.insert(doc_id.clone(), key);
                self.doc_ids.insert(key, doc_id);
                self.last_doc_key = self.last_doc_key.max(key);
                Ok(Op::RemoveDocument { key })
            }
            Op::RemoveDocument { key } => {
                let doc_id = self
                    .doc_ids
                    .remove(&key)
                    .ok_or_else(|| StorageError::MissingRow(format!("document key {key}")))?;
                self.docs.remove(&doc_id);
                self.by_doc.remove(&key);
                Ok(Op::InsertDocument { key, doc_id })
            }
            Op::InsertRevision(row) => {
                if self.revisions.contains_key(&row.sequence) {
                    return Err(StorageError::DuplicateRow(format!(
                        "revision sequence {}",
                        row.sequence
                    )));
                }
                if !self.doc_ids.contains_key(&row.doc_key) {
                    return Err(StorageError::MissingRow(format!("document key {}", row.doc_key)));
                }
                let sequence = row.sequence;
                self.last_sequence = self.last_sequence.max(sequence);
                self.by_doc.entry(row.doc_key).or_default().insert(sequence);
                self.revisions.insert(sequence, row);
                Ok(Op::DeleteRevision { sequence })
            }
            Op::DeleteRevision { sequence } => {
                let row = self
                    .revisions
                    .remove(&sequence)
                    .ok_or_else(|| StorageError::MissingRow(format!("revision sequence {sequence}")))?;
                if let Some(seqs) = self.by_doc.get_mut(&row.doc_key) {
                    seqs.remove(&sequence);
                }
                Ok(Op::InsertRevision(row))
            }
            Op::SetCurrent { sequence, current } => {
                let row = self.revision_mut(sequence)?;
                let previous = std::mem::replace(&mut row.current, current);
                Ok(Op::SetCurrent {
                    sequence,
                    current: previous,
                })
            }
            Op::SetBody { sequence, body } => {
                let row = self.revision_mut(sequence)?;
                let previous = std::mem::replace(&mut row.body, body);
                Ok(Op::SetBody {
                    sequence,
                    body: previous,
                })
            }
            Op::InsertAttachment(row) => {
                if !self.revisions.contains_key(&row.sequence) {
                    return Err(StorageError::MissingRow(format!(
                        "revision sequence {}",
                        row.sequence
                    )));
                }
                let id = (row.sequence, row.name.clone());
                if self.attachments.contains_key(&id) {
                    return Err(StorageError::DuplicateRow(format!(
                        "attachment {} of sequence {}",
                        id.1, id.0
                    )));
                }
                self.attachments.insert(id.clone(), row);
                Ok(Op::DeleteAttachment {
                    sequence: id.0,
                    name: id.1,
                })
            }
            Op::DeleteAttachment { sequence, name } => {
                let row = self
                    .attachments
                    .remove(&(sequence, name.clone()))
                    .ok_or_else(|| {
                        StorageError::MissingRow(format!("attachment {name} of sequence {sequence}"))
                    })?;
                Ok(Op::InsertAttachment(row))
            }
            Op::PutLocal(row) => {
                let doc_id = row.doc_id.clone();
                Ok(match self.local_docs.insert(doc_id.clone(), row) {
                    Some(previous) => Op::PutLocal(previous),
                    None => Op::DeleteLocal { doc_id },
                })
            }
            Op::DeleteLocal { doc_id } => {
                let row = self
                    .local_docs
                    .remove(&doc_id)
                    .ok_or_else(|| StorageError::MissingRow(format!("local document {doc_id}")))?;
                Ok(Op::PutLocal(row))
            }
            Op::SetInfo { key, value } => Ok(match self.info.insert(key.clone(), value) {
                Some(previous) => Op::SetInfo {
                    key,
                    value: previous,
                },
                None => Op::RemoveInfo { key },
            }),
            Op::RemoveInfo { key } => {
                let value = self
                    .info
                    .remove(&key)
                    .ok_or_else(|| StorageError::MissingRow(format!("info {key}")))?;
                Ok(Op::SetInfo { key, value })
            }
            Op::SetLastSequence { sequence } => {
                let previous = std::mem::replace(&mut self.last_sequence, sequence);
                Ok(Op::SetLastSequence { sequence: previous })
            }
        }
    }

    fn revision_mut(&mut self, sequence: Sequence) -> Result<&mut RevisionRow, StorageError> {
        self.revisions
            .get_mut(&sequence)
            .ok_or_else(|| StorageError::MissingRow(format!("revision sequence {sequence}")))
    }

    /// Ops that rebuild these tables from empty.
    #[allow(clippy::disallowed_methods)] // Clone needed to copy rows into the snapshot
    pub fn snapshot(&self) -> Vec<Op> {
        let mut ops = Vec::with_capacity(
            1 + self.docs.len() + self.revisions.len() + self.attachments.len(),
        );
        for (doc_id, key) in &self.docs {
            ops.push(Op::InsertDocument {
                key: *key,
                doc_id: doc_id.clone(),
            });
        }
        for row in self.revisions.values() {
            ops.push(Op::InsertRevision(row.clone()));
        }
        for row in self.attachments.values() {
            ops.push(Op::InsertAttachment(row.clone()));
        }
        for row in self.local_docs.values() {
            ops.push(Op::PutLocal(row.clone()));
        }
        for (key, value) in &self.info {
            ops.push(Op::SetInfo {
                key: key.clone(),
                value: value.clone(),
            });
        }
        ops.push(Op::SetLastSequence {
            sequence: self.last_sequence,
        });
        ops
    }
}
