//! Transactional document store interface.
//!
//! The engine never talks to a concrete database; it talks to these traits.
//! A [`DocumentStore`] runs closures against a [`Transaction`]: reads record
//! what was observed, writes are buffered, and the commit applies every
//! buffered write atomically only if nothing observed has changed in the
//! meantime - otherwise the whole transaction fails with
//! [`StoreError::Conflict`] and nothing is applied. That conflict signal is
//! the engine's sole cross-worker coordination mechanism.
//!
//! [`memory::MemoryStore`] is the in-process reference implementation used
//! by the tests, demos and benches; production deployments implement these
//! traits over their database client.
//!
//! # Example
//!
//! ```rust
//! use sommatori::keys::DocPath;
//! use sommatori::store::{memory::MemoryStore, DocumentStore, StoreError};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let page = DocPath::new("pages/home");
//! store.transaction(|t| {
//!     t.set(&page, json!({"visits": 0}));
//!     Ok::<_, StoreError>(())
//! })?;
//! # Ok::<(), StoreError>(())
//! ```

pub mod memory;

use serde_json::Value;
use thiserror::Error;

use crate::keys::DocPath;
use crate::snapshot::ShardSnapshot;

/// Errors surfaced by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document observed by the transaction changed (or disappeared)
    /// before commit. Transient: retry the enclosing operation.
    #[error("transaction conflict on {path}")]
    Conflict {
        /// The first conflicting document.
        path: DocPath,
    },

    /// The backing store failed outside the optimistic-concurrency protocol.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error is transient and worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// A transactional document database with lexicographically ordered keys.
pub trait DocumentStore {
    /// Runs `body` inside a fresh transaction and commits the writes it
    /// buffered.
    ///
    /// The transaction is attempted exactly once: a conflicting commit
    /// surfaces [`StoreError::Conflict`] to the caller, who owns the retry
    /// policy. If `body` returns an error, nothing is committed.
    fn transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>;
}

/// One in-flight transaction: recorded reads plus buffered writes.
///
/// Reads observe the committed state, not this transaction's own buffered
/// writes; issue all reads before the writes that depend on them.
pub trait Transaction {
    /// Reads one document, recording the observed version.
    fn get(&mut self, path: &DocPath) -> Result<ShardSnapshot>;

    /// Reads every document in a collection named `collection_id` whose full
    /// path lies in `[start, end)`, ordered by path, at most `limit` of
    /// them. An empty bound means unbounded on that side.
    ///
    /// Only the returned documents have their versions recorded: the range
    /// itself is not protected against concurrent inserts. Callers that
    /// delete what they read must re-read it in the deleting transaction.
    fn query_range(
        &mut self,
        collection_id: &str,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<ShardSnapshot>>;

    /// Buffers an overwrite (creating the document if missing).
    fn set(&mut self, path: &DocPath, value: Value);

    /// Buffers a deep merge: object fields recurse, everything else is
    /// replaced, fields absent from `value` are preserved. Creates the
    /// document if missing.
    fn merge(&mut self, path: &DocPath, value: Value);

    /// Buffers appending one record to the document's `_updates_` array,
    /// creating the document and the array as needed.
    fn append_update(&mut self, path: &DocPath, record: Value);

    /// Buffers a delete. Deleting a missing document is a no-op.
    fn delete(&mut self, path: &DocPath);
}

/// Writes one increment as a fresh leaf shard under
/// `<counter>/<collection_id>/<random key>` and returns the shard's path.
///
/// This is the whole write surface counter users need: each call creates
/// its own document, so arbitrarily many callers increment concurrently
/// without ever contending on a shared document. The `delta` document's
/// numeric leaves carry the contribution, e.g. `{"amount": 1}`.
///
/// # Example
///
/// ```rust
/// use sommatori::keys::DocPath;
/// use sommatori::store::{memory::MemoryStore, write_increment};
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let counter = DocPath::new("pages/home");
/// let shard = write_increment(&store, &counter, "_counter_shards_", json!({"amount": 1}))?;
/// assert_eq!(shard.collection_id(), Some("_counter_shards_"));
/// # Ok::<(), sommatori::store::StoreError>(())
/// ```
pub fn write_increment<S: DocumentStore>(
    store: &S,
    counter: &DocPath,
    collection_id: &str,
    delta: Value,
) -> Result<DocPath> {
    let key = uuid::Uuid::new_v4().to_string();
    let path = counter.child(collection_id).child(&key);
    store.transaction(|t| {
        t.set(&path, delta);
        Ok::<_, StoreError>(())
    })?;
    Ok(path)
}
