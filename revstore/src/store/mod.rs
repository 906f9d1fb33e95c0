//! The document store.
//!
//! A [`DocumentStore`] owns the record store, the blob store, the document
//! cache, the change broadcast channel and the named validation and filter
//! registries of one database.
//!
//! # Concurrency
//!
//! The record store sits behind an `RwLock`. Every write operation takes
//! the write lock for the whole read-validate-write transaction; reads take
//! the read lock and therefore never observe a partial write. Change events
//! are published before the write lock is released, so subscribers and
//! cached handles see them in commit order.
//!
//! # Invariants
//!
//! - Sequences are strictly increasing and never reused.
//! - Every non-root revision's parent exists in the same document's tree.
//! - A committed revision's id, parent and body never change, except that
//!   compaction may drop the body of a non-leaf.

mod attachments;
mod body;
mod cache;
mod changes;
mod compaction;
mod error;
mod history;
mod insert;
mod local;
mod merge;
mod purge;
mod validation;
mod winner;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{Notify, broadcast};

use crate::blob::{BlobKey, BlobStore, BlobWriter};
use crate::config::StoreConfig;
use crate::storage::{RecordStore, StorageError};
use crate::types::ids::hex_string;
use crate::types::DatabaseChange;

pub use attachments::{AttachmentContent, ResolvedAttachment, stub_out_attachments};
pub use cache::{DocumentCache, DocumentHandle};
pub use changes::{ChangeReceiver, ChangesOptions};
pub use compaction::{CompactionConfig, CompactionReport, spawn_compaction_task};
pub use error::{ErrorKind, StoreError};
pub use history::{
    AllDocsOptions, AllDocsResult, AllDocsRow, ContentOptions, parse_revision_history,
    revision_history_dict,
};
pub use local::LocalDocument;
pub use merge::ForceInsertOutcome;
pub use validation::{ChangeFilter, DEFAULT_REJECTION, ValidationContext, Validator, Verdict};

const PRIVATE_UUID_KEY: &str = "privateUUID";
const PUBLIC_UUID_KEY: &str = "publicUUID";
const CHECKPOINT_KEY_PREFIX: &str = "checkpoint";

/// An open revision-tree document database.
pub struct DocumentStore {
    config: StoreConfig,
    db: RwLock<RecordStore>,
    blobs: BlobStore,
    /// Streamed attachment content waiting to be referenced by digest.
    pending_attachments: Mutex<HashMap<BlobKey, BlobWriter>>,
    validations: RwLock<BTreeMap<String, Arc<dyn Validator>>>,
    filters: RwLock<HashMap<String, Arc<dyn ChangeFilter>>>,
    cache: DocumentCache,
    changes: broadcast::Sender<DatabaseChange>,
    compaction: Arc<Notify>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("directory", &self.config.directory)
            .field("cached_documents", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Open (creating if needed) the store in `config.directory`.
    ///
    /// Replays the commit log, opens the blob store and assigns the store
    /// UUIDs on first open.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory, log or blob store cannot be
    /// opened.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.directory).map_err(StorageError::from)?;
        let (db, recovery) = RecordStore::open(&config.log_path(), config.sync_on_commit)?;
        let blobs = BlobStore::open(config.attachments_path())?;
        let (changes, _) = broadcast::channel(config.change_channel_capacity.get());

        let store = Self {
            cache: DocumentCache::new(config.doc_cache_capacity),
            db: RwLock::new(db),
            blobs,
            pending_attachments: Mutex::new(HashMap::new()),
            validations: RwLock::new(BTreeMap::new()),
            filters: RwLock::new(HashMap::new()),
            changes,
            compaction: Arc::new(Notify::new()),
            config,
        };
        store.ensure_uuids()?;

        tracing::info!(
            directory = %store.config.directory.display(),
            last_sequence = store.read()?.last_sequence(),
            truncated_bytes = recovery.truncated_bytes,
            "Opened document store"
        );
        Ok(store)
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The blob store holding attachment content.
    #[must_use]
    pub const fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, RecordStore>, StoreError> {
        self.db
            .read()
            .map_err(|_| StoreError::Storage(StorageError::LockPoisoned))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, RecordStore>, StoreError> {
        self.db
            .write()
            .map_err(|_| StoreError::Storage(StorageError::LockPoisoned))
    }

    /// Publish committed changes to cached handles and subscribers.
    ///
    /// Called with the write guard still held, so events from concurrent
    /// writers cannot interleave.
    pub(crate) fn publish(&self, db: &RecordStore, changes: Vec<DatabaseChange>) {
        for change in changes {
            if let Some(handle) = self.cache.get(change.doc_id()) {
                handle.revision_added(&change);
            }
            tracing::debug!(
                doc_id = %change.doc_id(),
                rev_id = %change.revision.rev_id,
                sequence = change.sequence,
                last_sequence = db.last_sequence(),
                source = change.source.as_deref().unwrap_or("local"),
                "Published change"
            );
            // No receivers is not an error.
            let _ = self.changes.send(change);
        }
    }

    // =========================================================================
    // Document handles
    // =========================================================================

    /// Handle of `doc_id`, from the cache or freshly loaded.
    ///
    /// A handle exists even for a document with no revisions yet; its
    /// current revision is then `None`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn document(&self, doc_id: &str) -> Result<Arc<DocumentHandle>, StoreError> {
        if let Some(handle) = self.cache.get(doc_id) {
            return Ok(handle);
        }
        // Cached under the read guard so no commit can land between
        // loading the winner and registering the handle.
        let db = self.read()?;
        let winner = db
            .doc_key(doc_id)
            .and_then(|key| winner::winner_of(&db, key));
        let handle = self.cache.get_or_insert(Arc::new(DocumentHandle::new(
            doc_id.to_string(),
            winner,
            db.last_sequence(),
        )));
        drop(db);
        Ok(handle)
    }

    /// Handle of `doc_id` if the document exists and is not deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the document has no live winner.
    pub fn existing_document(&self, doc_id: &str) -> Result<Arc<DocumentHandle>, StoreError> {
        let handle = self.document(doc_id)?;
        match handle.current_revision() {
            Some(winner) if !winner.deleted => Ok(handle),
            _ => Err(StoreError::not_found(format!("document '{doc_id}' not found"))),
        }
    }

    /// Handle of `doc_id` only if it is currently cached.
    #[must_use]
    pub fn cached_document(&self, doc_id: &str) -> Option<Arc<DocumentHandle>> {
        self.cache.get(doc_id)
    }

    // =========================================================================
    // Registries
    // =========================================================================

    /// Register, replace or (with `None`) remove a named validation.
    pub fn define_validation(&self, name: &str, validator: Option<Arc<dyn Validator>>) {
        let mut validations = self
            .validations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match validator {
            Some(validator) => {
                validations.insert(name.to_string(), validator);
            }
            None => {
                validations.remove(name);
            }
        }
    }

    /// Look up a named validation.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn validation(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Arc::clone)
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub(crate) fn validators(&self) -> Vec<(String, Arc<dyn Validator>)> {
        self.validations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, validator)| (name.clone(), Arc::clone(validator)))
            .collect()
    }

    /// Register, replace or (with `None`) remove a named change filter.
    pub fn define_filter(&self, name: &str, filter: Option<Arc<dyn ChangeFilter>>) {
        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        match filter {
            Some(filter) => {
                filters.insert(name.to_string(), filter);
            }
            None => {
                filters.remove(name);
            }
        }
    }

    /// Look up a named change filter.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn filter(&self, name: &str) -> Option<Arc<dyn ChangeFilter>> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Arc::clone)
    }

    // =========================================================================
    // Store identity and replication checkpoints
    // =========================================================================

    fn ensure_uuids(&self) -> Result<(), StoreError> {
        let mut db = self.write()?;
        if db.info(PRIVATE_UUID_KEY).is_some() && db.info(PUBLIC_UUID_KEY).is_some() {
            return Ok(());
        }
        db.run_in_transaction(|db| -> Result<(), StoreError> {
            db.set_info(PRIVATE_UUID_KEY, &new_uuid())?;
            db.set_info(PUBLIC_UUID_KEY, &new_uuid())?;
            Ok(())
        })
    }

    /// Identifier known only to this store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn private_uuid(&self) -> Result<String, StoreError> {
        self.info_value(PRIVATE_UUID_KEY)
    }

    /// Identifier this store shares with replication peers.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn public_uuid(&self) -> Result<String, StoreError> {
        self.info_value(PUBLIC_UUID_KEY)
    }

    /// Assign fresh UUIDs, e.g. after the store files were copied.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the change cannot be committed.
    pub fn replace_uuids(&self) -> Result<(), StoreError> {
        let mut db = self.write()?;
        db.run_in_transaction(|db| -> Result<(), StoreError> {
            db.set_info(PRIVATE_UUID_KEY, &new_uuid())?;
            db.set_info(PUBLIC_UUID_KEY, &new_uuid())?;
            Ok(())
        })?;
        tracing::info!("Replaced store UUIDs");
        Ok(())
    }

    fn info_value(&self, key: &str) -> Result<String, StoreError> {
        self.read()?
            .info(key)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Storage(StorageError::MissingRow(format!("info {key}"))))
    }

    /// Last sequence checkpointed for a replication with `remote`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store lock is poisoned.
    pub fn last_sequence_with_remote(
        &self,
        remote: &str,
        push: bool,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .read()?
            .info(&checkpoint_key(remote, push))
            .map(str::to_string))
    }

    /// Record the checkpoint of a replication with `remote`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the change cannot be committed.
    pub fn set_last_sequence(
        &self,
        last_sequence: &str,
        remote: &str,
        push: bool,
    ) -> Result<(), StoreError> {
        let mut db = self.write()?;
        db.run_in_transaction(|db| db.set_info(&checkpoint_key(remote, push), last_sequence))?;
        Ok(())
    }
}

fn checkpoint_key(remote: &str, push: bool) -> String {
    let direction = if push { "push" } else { "pull" };
    format!("{CHECKPOINT_KEY_PREFIX}:{direction}:{remote}")
}

fn new_uuid() -> String {
    use rand::Rng;

    let bytes: [u8; 16] = rand::rng().random();
    hex_string(&bytes)
}
