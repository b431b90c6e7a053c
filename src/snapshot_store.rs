//! Best-effort persistence of the last fetched flag snapshot.
//!
//! Caching is an optimization only: read failures and corrupt entries are treated as a missing
//! snapshot and write failures are logged, never surfaced.
use std::sync::Arc;

use crate::{flag::Flags, storage::KeyValueStore};

pub(crate) struct SnapshotStore {
    backend: Arc<dyn KeyValueStore>,
    environment: String,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, environment: impl Into<String>) -> SnapshotStore {
        SnapshotStore {
            backend,
            environment: environment.into(),
        }
    }

    /// Storage key for the snapshot of `identity`. The identity is hashed so that it does not
    /// leak into storage keys.
    fn key(&self, identity: &str) -> String {
        format!("ul:{}:{:x}", self.environment, md5::compute(identity))
    }

    /// Load the snapshot persisted for `identity`. Returns `None` if there is none, if it cannot
    /// be read, or if it cannot be parsed.
    pub async fn load_flags(&self, identity: &str) -> Option<Flags> {
        let value = match self.backend.get(&self.key(identity)).await {
            Ok(value) => value?,
            Err(err) => {
                log::debug!(target: "unlaunch", "failed to read cached flags: {err}");
                return None;
            }
        };

        match serde_json::from_str(&value) {
            Ok(flags) => Some(flags),
            Err(err) => {
                log::warn!(target: "unlaunch", "ignoring corrupt cached flags: {err}");
                None
            }
        }
    }

    /// Persist `flags` as the snapshot for `identity`.
    pub async fn save_flags(&self, identity: &str, flags: &Flags) {
        let value = match serde_json::to_string(flags) {
            Ok(value) => value,
            Err(err) => {
                log::warn!(target: "unlaunch", "failed to serialize flags for caching: {err}");
                return;
            }
        };

        if let Err(err) = self.backend.set(&self.key(identity), &value).await {
            log::warn!(target: "unlaunch", "failed to cache flags: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::SnapshotStore;
    use crate::{
        flag::Flags,
        storage::{InMemoryStore, KeyValueStore},
        test_utils::{flag, FailingStore},
    };

    fn snapshot() -> Flags {
        [("a".to_owned(), flag("a", "on")), ("b".to_owned(), flag("b", "off"))].into()
    }

    #[tokio::test]
    async fn saves_and_loads_per_identity() {
        let store = SnapshotStore::new(Arc::new(InMemoryStore::new()), "env");

        store.save_flags("alice", &snapshot()).await;

        assert_eq!(store.load_flags("alice").await, Some(snapshot()));
        assert_eq!(store.load_flags("bob").await, None);
    }

    #[tokio::test]
    async fn snapshots_are_scoped_by_environment() {
        let backend = Arc::new(InMemoryStore::new());
        let production = SnapshotStore::new(backend.clone(), "production");
        let staging = SnapshotStore::new(backend, "staging");

        production.save_flags("alice", &snapshot()).await;

        assert_eq!(staging.load_flags("alice").await, None);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_treated_as_absent() {
        let backend = Arc::new(InMemoryStore::new());
        let store = SnapshotStore::new(backend.clone(), "env");
        backend.set(&store.key("alice"), "{not json").await.unwrap();

        assert_eq!(store.load_flags("alice").await, None);
    }

    #[tokio::test]
    async fn backend_failures_are_swallowed() {
        let store = SnapshotStore::new(Arc::new(FailingStore), "env");

        store.save_flags("alice", &snapshot()).await;

        assert_eq!(store.load_flags("alice").await, None);
    }
}
