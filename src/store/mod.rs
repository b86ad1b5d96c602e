use std::fmt::{Debug, Display};

pub mod file;
pub mod mem;

/// A `StreamKey` identifies an independently-progressing event or update
/// stream with its own durable cursor: a ledger event name such as
/// `OrderCreated`, or a reconciliation stream such as `completed-proofs`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct StreamKey {
    name: String,
}

impl StreamKey {
    /// Creates a new stream key.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into() }
    }

    /// The stream identifier.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The file name carrying this stream's cursor on disk.
    pub fn file_name(&self) -> String {
        format!("{}.cursor", self.name)
    }
}

impl Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StreamKey").field(&self.name).finish()
    }
}

impl Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<&str> for StreamKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StreamKey {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// HistoryStore is a simple trait for storing and retrieving the cursor of
/// the last processed position (block height or timestamp) per stream.
pub trait HistoryStore: Clone + Send + Sync {
    /// Sets the new cursor for that stream and returns the previous one.
    ///
    /// Cursors only move forward: a value lower than the stored one is a
    /// logic error upstream, so it is logged and the stored value is kept.
    fn set_last_cursor<K: Into<StreamKey> + Debug>(
        &self,
        key: K,
        cursor: u64,
    ) -> crate::error::Result<u64>;

    /// Get the last cursor for that stream.
    /// Returns 0 for a stream that has never been checkpointed.
    fn get_last_cursor<K: Into<StreamKey> + Debug>(
        &self,
        key: K,
    ) -> crate::error::Result<u64>;
}
