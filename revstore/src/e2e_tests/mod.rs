//! End-to-end tests at the document store API level.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! against a store on a temporary directory.

#![cfg(test)]

mod helpers;

mod test_all_docs;
mod test_attachments;
mod test_change_feed;
mod test_compaction;
mod test_document_a;
mod test_local_docs;
mod test_purge;
mod test_recovery;
mod test_replication;
mod test_sequences;
mod test_stale_parent;
mod test_validation;
