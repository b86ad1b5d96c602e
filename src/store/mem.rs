use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{HistoryStore, StreamKey};

/// An in-memory checkpoint store, mostly useful in tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    last_cursors: Arc<RwLock<HashMap<StreamKey, u64>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl HistoryStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn set_last_cursor<K: Into<StreamKey> + Debug>(
        &self,
        key: K,
        cursor: u64,
    ) -> crate::error::Result<u64> {
        let key = key.into();
        let mut guard = self.last_cursors.write();
        let val = guard.entry(key.clone()).or_insert(0);
        let old = *val;
        if cursor < old {
            tracing::warn!(
                stream = %key,
                current = old,
                rejected = cursor,
                "Cursor would move backwards; keeping the stored value",
            );
            return Ok(old);
        }
        *val = cursor;
        Ok(old)
    }

    #[tracing::instrument(skip(self))]
    fn get_last_cursor<K: Into<StreamKey> + Debug>(
        &self,
        key: K,
    ) -> crate::error::Result<u64> {
        let guard = self.last_cursors.read();
        Ok(guard.get(&key.into()).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behaves_like_the_durable_store() {
        let store = InMemoryStore::default();
        assert_eq!(store.get_last_cursor("OrderCreated").unwrap(), 0);
        store.set_last_cursor("OrderCreated", 5).unwrap();
        store.set_last_cursor("OrderCreated", 3).unwrap();
        assert_eq!(store.get_last_cursor("OrderCreated").unwrap(), 5);
    }
}
