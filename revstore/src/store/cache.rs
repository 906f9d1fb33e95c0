//! Bounded cache of document handles.
//!
//! A handle tracks a document's current winner. Handles are shared
//! (`Arc`), so a caller holding one keeps seeing updates even after the
//! cache evicts it; the store only updates handles it still caches.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use lru::LruCache;

use crate::types::{DatabaseChange, RevId, Sequence, WinningRevision};

/// In-memory view of one document.
#[derive(Debug)]
pub struct DocumentHandle {
    doc_id: String,
    state: RwLock<HandleState>,
}

#[derive(Debug)]
struct HandleState {
    winner: Option<WinningRevision>,
    /// Last committed sequence reflected in `winner`.
    as_of: Sequence,
}

impl DocumentHandle {
    pub(crate) const fn new(
        doc_id: String,
        current: Option<WinningRevision>,
        as_of: Sequence,
    ) -> Self {
        Self {
            doc_id,
            state: RwLock::new(HandleState {
                winner: current,
                as_of,
            }),
        }
    }

    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// The current winner, or `None` if the document has no revisions.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Clone needed: winner is shared
    pub fn current_revision(&self) -> Option<WinningRevision> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .winner
            .clone()
    }

    /// Id of the current winner.
    #[must_use]
    pub fn current_rev_id(&self) -> Option<RevId> {
        self.current_revision().map(|winner| winner.rev_id)
    }

    /// Whether the document currently resolves to a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.current_revision().is_some_and(|winner| winner.deleted)
    }

    /// Whether the document currently has conflicting leaves.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        self.current_revision()
            .is_some_and(|winner| winner.conflicted)
    }

    /// Apply a committed change. Changes at or below the sequence the
    /// handle already reflects are ignored.
    pub(crate) fn revision_added(&self, change: &DatabaseChange) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if change.sequence <= state.as_of {
            tracing::trace!(
                doc_id = %self.doc_id,
                sequence = change.sequence,
                as_of = state.as_of,
                "Ignored stale change for document handle"
            );
            return;
        }
        #[allow(clippy::disallowed_methods)] // Clone needed to keep the winner
        let winner = change.winner.clone();
        state.winner = winner;
        state.as_of = change.sequence;
    }
}

/// LRU cache keyed by document id.
#[derive(Debug)]
pub struct DocumentCache {
    entries: Mutex<LruCache<String, Arc<DocumentHandle>>>,
}

impl DocumentCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Look up a handle, marking it most recently used.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get(&self, doc_id: &str) -> Option<Arc<DocumentHandle>> {
        self.lock().get(doc_id).map(Arc::clone)
    }

    /// Insert a handle, evicting the least recently used one if full.
    #[allow(clippy::disallowed_methods)] // Clone needed: id keys the cache
    pub fn insert(&self, handle: Arc<DocumentHandle>) {
        let key = handle.doc_id.clone();
        let evicted = self.lock().push(key.clone(), handle);
        if let Some((doc_id, _)) = evicted.filter(|(doc_id, _)| *doc_id != key) {
            tracing::trace!(%doc_id, "Evicted document handle");
        }
    }

    /// The cached handle for `handle`'s document, inserting `handle` if
    /// there is none.
    #[allow(clippy::disallowed_methods)] // Clone needed: id keys the cache
    pub fn get_or_insert(&self, handle: Arc<DocumentHandle>) -> Arc<DocumentHandle> {
        let key = handle.doc_id.clone();
        Arc::clone(self.lock().get_or_insert(key, || handle))
    }

    /// Drop the handle of `doc_id`, if cached.
    pub fn remove(&self, doc_id: &str) {
        self.lock().pop(doc_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<DocumentHandle>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
