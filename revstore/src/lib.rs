#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Life of a write:
// 1. A caller hands the store an edit (put_revision) or a replicated
//    revision with its history (force_insert)
// 2. Under the write lock, in one record-store transaction:
//     - Resolve the parent and check for conflicts
//     - Plan attachments (inline data, pending streams, inherited stubs)
//     - Run validations
//     - Insert the row, demote the parent, link attachments
// 3. Commit appends the transaction to the commit log
// 4. After the lock is released the change is published to cached
//    document handles and change subscribers
//
// System components:
//  - Record store (tables + commit log)
//  - Blob store (content-addressed attachment files)
//  - Document store (revision trees, change feed, local docs)

pub mod blob;
pub mod config;
mod e2e_tests;
pub mod storage;
pub mod store;
pub mod testing;
pub mod types;

pub use blob::{BlobKey, BlobStore, BlobStoreError, BlobWriter};
pub use config::{ConfigError, StoreConfig};
pub use store::{
    ChangeReceiver, ChangesOptions, ContentOptions, DocumentStore, ErrorKind, ForceInsertOutcome,
    StoreError,
};
pub use types::{Attachment, Body, DatabaseChange, DocumentEdit, RevId, Revision, Sequence};
