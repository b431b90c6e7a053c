//! In-memory holder of the currently active flag snapshot.
use std::sync::{Arc, RwLock};

use crate::flag::Flags;

/// `FlagStore` provides a thread-safe (`Sync`) holder for the flag snapshot that allows
/// concurrent access for readers (flag lookups) and writers (fetches, cache loads).
///
/// The snapshot itself is immutable and can only be replaced completely, so readers never observe
/// a half-updated set of flags.
#[derive(Default)]
pub(crate) struct FlagStore {
    flags: RwLock<Arc<Flags>>,
}

impl FlagStore {
    pub fn new() -> Self {
        FlagStore::default()
    }

    /// Get the current snapshot. Later writes do not affect the returned value.
    pub fn get_flags(&self) -> Arc<Flags> {
        // self.flags.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen.
        let flags = self
            .flags
            .read()
            .expect("thread holding flags lock should not panic");

        flags.clone()
    }

    /// Replace the snapshot, returning the previous one.
    pub fn replace_flags(&self, flags: Arc<Flags>) -> Arc<Flags> {
        let mut slot = self
            .flags
            .write()
            .expect("thread holding flags lock should not panic");
        std::mem::replace(&mut *slot, flags)
    }

    pub fn clear(&self) {
        // Constructing new value before requesting the lock to minimize lock span.
        self.replace_flags(Arc::new(Flags::new()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FlagStore;
    use crate::test_utils::flag;

    #[test]
    fn can_replace_flags_from_another_thread() {
        let store = Arc::new(FlagStore::new());

        assert!(store.get_flags().is_empty());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.replace_flags(Arc::new([("a".to_owned(), flag("a", "on"))].into()));
            })
            .join();
        }

        assert_eq!(store.get_flags()["a"].variation(), Some("on".to_owned()));
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = FlagStore::new();
        store.replace_flags(Arc::new([("a".to_owned(), flag("a", "on"))].into()));

        let snapshot = store.get_flags();
        store.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(store.get_flags().is_empty());
    }
}
