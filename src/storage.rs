//! Key-value storage used to cache flag snapshots and the anonymous user identity between
//! sessions.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::Result;

/// A persistent key-value store.
///
/// Both operations may fail. The client treats a failed read as a missing value and a failed
/// write as non-fatal, since everything it stores can be fetched again.
///
/// A store may be shared between several clients. Writes are last-writer-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value).await
    }
}

/// A [`KeyValueStore`] that keeps values in memory for the lifetime of the process.
///
/// Useful to share a cache between client instances living in the same process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .read()
            .expect("thread holding store lock should not panic");
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .expect("thread holding store lock should not panic");
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
