use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{HistoryStore, StreamKey};

/// A checkpoint store that keeps one small file per stream, holding the
/// decimal string of the last processed cursor. The path of each file is
/// derived from the stream identifier, so a restart recovers exactly the
/// prior cursor.
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
    // keeps the backing directory alive for temporary stores.
    _tmp: Option<Arc<tempfile::TempDir>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("dir", &self.dir).finish()
    }
}

impl FileStore {
    /// Opens (creating if needed) a checkpoint directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> crate::error::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            _tmp: None,
        })
    }

    /// A store in a temporary directory, deleted when the store is dropped.
    pub fn temporary() -> crate::error::Result<Self> {
        let tmp = tempfile::tempdir()?;
        Ok(Self {
            dir: tmp.path().to_path_buf(),
            _tmp: Some(Arc::new(tmp)),
        })
    }

    fn cursor_path(&self, key: &StreamKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    fn read_cursor(&self, key: &StreamKey) -> crate::error::Result<u64> {
        let path = self.cursor_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(0)
            }
            Err(e) => return Err(e.into()),
        };
        match raw.trim().parse::<u64>() {
            Ok(cursor) => Ok(cursor),
            Err(_) => {
                tracing::warn!(
                    "Malformed cursor file {}; defaulting to 0",
                    path.display()
                );
                Ok(0)
            }
        }
    }
}

impl HistoryStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn set_last_cursor<K: Into<StreamKey> + Debug>(
        &self,
        key: K,
        cursor: u64,
    ) -> crate::error::Result<u64> {
        let key = key.into();
        let current = self.read_cursor(&key)?;
        if cursor < current {
            tracing::warn!(
                stream = %key,
                current,
                rejected = cursor,
                "Cursor would move backwards; keeping the stored value",
            );
            return Ok(current);
        }
        // write to a temp file in the same directory, then rename: the
        // stored cursor is either the old value or the new one, never torn.
        let path = self.cursor_path(&key);
        let tmp_path = self.dir.join(format!(".{}.tmp", key.file_name()));
        fs::write(&tmp_path, cursor.to_string())?;
        fs::rename(&tmp_path, &path)?;
        Ok(current)
    }

    #[tracing::instrument(skip(self))]
    fn get_last_cursor<K: Into<StreamKey> + Debug>(
        &self,
        key: K,
    ) -> crate::error::Result<u64> {
        self.read_cursor(&key.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stream_defaults_to_zero() {
        let store = FileStore::temporary().unwrap();
        assert_eq!(store.get_last_cursor("OrderCreated").unwrap(), 0);
    }

    #[test]
    fn set_then_get_roundtrips_and_returns_previous() {
        let store = FileStore::temporary().unwrap();
        let old = store.set_last_cursor("OrderCreated", 42).unwrap();
        assert_eq!(old, 0);
        assert_eq!(store.get_last_cursor("OrderCreated").unwrap(), 42);
        let old = store.set_last_cursor("OrderCreated", 43).unwrap();
        assert_eq!(old, 42);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let store = FileStore::temporary().unwrap();
        store.set_last_cursor("completed-proofs", 100).unwrap();
        // an out-of-order lower value is rejected, not stored.
        let kept = store.set_last_cursor("completed-proofs", 7).unwrap();
        assert_eq!(kept, 100);
        assert_eq!(store.get_last_cursor("completed-proofs").unwrap(), 100);
        // setting the same value again is fine.
        store.set_last_cursor("completed-proofs", 100).unwrap();
        assert_eq!(store.get_last_cursor("completed-proofs").unwrap(), 100);
    }

    #[test]
    fn restart_recovers_the_persisted_cursor() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set_last_cursor("OrderClosed", 1234).unwrap();
        }
        // a fresh store over the same directory sees the same cursor.
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get_last_cursor("OrderClosed").unwrap(), 1234);
    }

    #[test]
    fn malformed_cursor_file_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("OrderCreated.cursor"), "not-a-number")
            .unwrap();
        assert_eq!(store.get_last_cursor("OrderCreated").unwrap(), 0);
    }

    #[test]
    fn streams_progress_independently() {
        let store = FileStore::temporary().unwrap();
        store.set_last_cursor("OrderCreated", 10).unwrap();
        store.set_last_cursor("OrderClosed", 20).unwrap();
        assert_eq!(store.get_last_cursor("OrderCreated").unwrap(), 10);
        assert_eq!(store.get_last_cursor("OrderClosed").unwrap(), 20);
    }
}
