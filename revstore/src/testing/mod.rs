//! Test helpers.

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
///
/// Later calls are no-ops, so every test may call it.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "revstore=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
pub use store::{TestStore, body};

#[cfg(test)]
mod store {
    use std::ops::Deref;

    use serde_json::Value;
    use tempfile::TempDir;

    use crate::config::StoreConfig;
    use crate::store::DocumentStore;
    use crate::types::Body;

    /// A [`DocumentStore`] in a temporary directory that is removed on drop.
    pub struct TestStore {
        store: DocumentStore,
        config: StoreConfig,
        // Dropped after `store`.
        _dir: TempDir,
    }

    impl TestStore {
        #[must_use]
        pub fn new() -> Self {
            Self::with_config(|config| config)
        }

        /// Open with a configuration adjusted by `configure`.
        #[allow(clippy::expect_used)]
        pub fn with_config(configure: impl FnOnce(StoreConfig) -> StoreConfig) -> Self {
            super::init_tracing();
            let dir = tempfile::tempdir().expect("create temp dir");
            let config = configure(StoreConfig::new(dir.path()).with_sync_on_commit(false));
            let store = DocumentStore::open(config.clone()).expect("open test store");
            Self {
                store,
                config,
                _dir: dir,
            }
        }

        /// Close the store and open it again from its files.
        #[allow(clippy::expect_used)]
        pub fn reopen(self) -> Self {
            let Self { store, config, _dir } = self;
            drop(store);
            let store = DocumentStore::open(config.clone()).expect("reopen test store");
            Self { store, config, _dir }
        }
    }

    impl Default for TestStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Deref for TestStore {
        type Target = DocumentStore;

        fn deref(&self) -> &DocumentStore {
            &self.store
        }
    }

    /// `value` as a document body; panics unless it is a JSON object.
    pub fn body(value: Value) -> Body {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }
}
