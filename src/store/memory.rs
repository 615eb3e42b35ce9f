//! In-memory reference implementation of the store traits.
//!
//! [`MemoryStore`] keeps every document in one ordered map guarded by a
//! [`crossbeam_utils::sync::ShardedLock`]: transactions read under the
//! (cheap, concurrent) read half, commits take the write half. Each
//! document carries a version stamped from a global commit sequence;
//! a commit validates that every document the transaction observed still
//! has the version it observed, then applies all buffered writes in one
//! critical section. That gives the same optimistic all-or-nothing
//! semantics the engine expects from a production document database, in a
//! form small enough to serve as the correctness oracle for every test.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::sync::{ShardedLock, ShardedLockReadGuard};
use serde_json::{json, Value};

use crate::keys::DocPath;
use crate::snapshot::ShardSnapshot;
use crate::store::{DocumentStore, Result, StoreError, Transaction};
use crate::update::UPDATES_FIELD;

#[derive(Debug, Clone)]
struct VersionedDoc {
    version: u64,
    data: Value,
}

/// An in-memory transactional document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: ShardedLock<BTreeMap<String, VersionedDoc>>,
    commits: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored (all collections).
    pub fn len(&self) -> usize {
        self.docs.read().map(|docs| docs.len()).unwrap_or(0)
    }

    /// Whether the store holds no documents at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_docs(&self) -> Result<ShardedLockReadGuard<'_, BTreeMap<String, VersionedDoc>>> {
        self.docs
            .read()
            .map_err(|_| StoreError::Backend("document map lock poisoned".into()))
    }

    fn commit(&self, txn: &MemoryTransaction<'_>) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| StoreError::Backend("document map lock poisoned".into()))?;

        for (path, observed) in &txn.reads {
            let current = docs.get(path).map(|doc| doc.version).unwrap_or(0);
            if current != *observed {
                return Err(StoreError::Conflict {
                    path: DocPath::new(path.clone()),
                });
            }
        }

        let version = self.commits.fetch_add(1, Ordering::Relaxed) + 1;
        for write in &txn.writes {
            match write {
                WriteOp::Set(path, value) => {
                    docs.insert(
                        path.clone(),
                        VersionedDoc {
                            version,
                            data: value.clone(),
                        },
                    );
                }
                WriteOp::Merge(path, value) => {
                    let mut data = docs
                        .get(path)
                        .map(|doc| doc.data.clone())
                        .unwrap_or_else(|| json!({}));
                    merge_value(&mut data, value);
                    docs.insert(path.clone(), VersionedDoc { version, data });
                }
                WriteOp::AppendUpdate(path, record) => {
                    let mut data = docs
                        .get(path)
                        .map(|doc| doc.data.clone())
                        .unwrap_or_else(|| json!({}));
                    push_update(&mut data, record.clone());
                    docs.insert(path.clone(), VersionedDoc { version, data });
                }
                WriteOp::Delete(path) => {
                    docs.remove(path);
                }
            }
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
    {
        let mut txn = MemoryTransaction {
            store: self,
            reads: BTreeMap::new(),
            writes: Vec::new(),
        };
        let out = body(&mut txn)?;
        if !txn.writes.is_empty() {
            self.commit(&txn).map_err(E::from)?;
        }
        Ok(out)
    }
}

enum WriteOp {
    Set(String, Value),
    Merge(String, Value),
    AppendUpdate(String, Value),
    Delete(String),
}

/// A transaction over a [`MemoryStore`].
///
/// `reads` maps each observed path to the document version seen (0 for a
/// missing document); `writes` buffers operations in call order.
pub struct MemoryTransaction<'s> {
    store: &'s MemoryStore,
    reads: BTreeMap<String, u64>,
    writes: Vec<WriteOp>,
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, path: &DocPath) -> Result<ShardSnapshot> {
        let docs = self.store.read_docs()?;
        let (version, data) = match docs.get(path.as_str()) {
            Some(doc) => (doc.version, Some(doc.data.clone())),
            None => (0, None),
        };
        self.reads.entry(path.as_str().to_string()).or_insert(version);
        Ok(ShardSnapshot {
            path: path.clone(),
            data,
        })
    }

    fn query_range(
        &mut self,
        collection_id: &str,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<ShardSnapshot>> {
        let docs = self.store.read_docs()?;
        let lower = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start.to_string())
        };
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.to_string())
        };

        let mut snaps = Vec::new();
        for (path, doc) in docs.range((lower, upper)) {
            if snaps.len() == limit {
                break;
            }
            let doc_path = DocPath::new(path.clone());
            if doc_path.collection_id() != Some(collection_id) {
                continue;
            }
            self.reads.entry(path.clone()).or_insert(doc.version);
            snaps.push(ShardSnapshot {
                path: doc_path,
                data: Some(doc.data.clone()),
            });
        }
        Ok(snaps)
    }

    fn set(&mut self, path: &DocPath, value: Value) {
        self.writes
            .push(WriteOp::Set(path.as_str().to_string(), value));
    }

    fn merge(&mut self, path: &DocPath, value: Value) {
        self.writes
            .push(WriteOp::Merge(path.as_str().to_string(), value));
    }

    fn append_update(&mut self, path: &DocPath, record: Value) {
        self.writes
            .push(WriteOp::AppendUpdate(path.as_str().to_string(), record));
    }

    fn delete(&mut self, path: &DocPath) {
        self.writes.push(WriteOp::Delete(path.as_str().to_string()));
    }
}

fn merge_value(existing: &mut Value, patch: &Value) {
    match (existing, patch) {
        (Value::Object(existing), Value::Object(patch)) => {
            for (key, value) in patch {
                match existing.get_mut(key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_value(slot, value);
                    }
                    _ => {
                        existing.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (existing, patch) => *existing = patch.clone(),
    }
}

fn push_update(data: &mut Value, record: Value) {
    if !data.is_object() {
        *data = json!({});
    }
    if let Value::Object(fields) = data {
        let records = fields
            .entry(UPDATES_FIELD.to_string())
            .or_insert_with(|| json!([]));
        if !records.is_array() {
            *records = json!([]);
        }
        if let Value::Array(records) = records {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str) -> DocPath {
        DocPath::new(path)
    }

    fn put(store: &MemoryStore, path: &str, value: Value) {
        store
            .transaction(|t| {
                t.set(&doc(path), value.clone());
                Ok::<_, StoreError>(())
            })
            .expect("put");
    }

    fn read(store: &MemoryStore, path: &str) -> Option<Value> {
        store
            .transaction(|t| t.get(&doc(path)))
            .expect("read")
            .data
    }

    #[test]
    fn test_set_get_delete() {
        let store = MemoryStore::new();
        put(&store, "pages/home", json!({"visits": 1}));
        assert_eq!(read(&store, "pages/home"), Some(json!({"visits": 1})));

        store
            .transaction(|t| {
                t.delete(&doc("pages/home"));
                Ok::<_, StoreError>(())
            })
            .expect("delete");
        assert_eq!(read(&store, "pages/home"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_merge_preserves_untouched_fields() {
        let store = MemoryStore::new();
        put(
            &store,
            "pages/home",
            json!({"stats": {"cnt": 2}, "data": "hello world"}),
        );
        store
            .transaction(|t| {
                t.merge(&doc("pages/home"), json!({"stats": {"cnt": 10, "new": 5}}));
                Ok::<_, StoreError>(())
            })
            .expect("merge");
        assert_eq!(
            read(&store, "pages/home"),
            Some(json!({"stats": {"cnt": 10, "new": 5}, "data": "hello world"}))
        );
    }

    #[test]
    fn test_merge_creates_missing_document() {
        let store = MemoryStore::new();
        store
            .transaction(|t| {
                t.merge(&doc("pages/home"), json!({"visits": 1}));
                Ok::<_, StoreError>(())
            })
            .expect("merge");
        assert_eq!(read(&store, "pages/home"), Some(json!({"visits": 1})));
    }

    #[test]
    fn test_append_update_grows_the_array() {
        let store = MemoryStore::new();
        let path = "pages/home/shards/\t\t4f1";
        for i in 0..3 {
            store
                .transaction(|t| {
                    t.append_update(&doc(path), json!({"_id_": i, "_data_": {"cnt": 1}}));
                    Ok::<_, StoreError>(())
                })
                .expect("append");
        }
        let data = read(&store, path).expect("exists");
        assert_eq!(data[UPDATES_FIELD].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_query_range_bounds_and_filter() {
        let store = MemoryStore::new();
        put(&store, "pages/home/shards/aaaaa", json!({"n": 1}));
        put(&store, "pages/home/shards/bbbbb", json!({"n": 2}));
        put(&store, "pages/home/shards/ccccc", json!({"n": 3}));
        // Same key range, different collection: must be filtered out.
        put(&store, "pages/home/other/bbbbb", json!({"n": 9}));
        // The counter itself is not in any shard collection of interest.
        put(&store, "pages/home", json!({"visits": 0}));

        let all = store
            .transaction(|t| t.query_range("shards", "", "", 100))
            .expect("query");
        assert_eq!(
            all.iter().map(|s| s.path.leaf()).collect::<Vec<_>>(),
            vec!["aaaaa", "bbbbb", "ccccc"]
        );

        // start inclusive, end exclusive.
        let mid = store
            .transaction(|t| {
                t.query_range(
                    "shards",
                    "pages/home/shards/bbbbb",
                    "pages/home/shards/ccccc",
                    100,
                )
            })
            .expect("query");
        assert_eq!(
            mid.iter().map(|s| s.path.leaf()).collect::<Vec<_>>(),
            vec!["bbbbb"]
        );

        let capped = store
            .transaction(|t| t.query_range("shards", "", "", 2))
            .expect("query");
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_conflicting_commit_is_rejected() {
        let store = MemoryStore::new();
        put(&store, "pages/home", json!({"visits": 1}));

        let result = store.transaction(|t| {
            let snap = t.get(&doc("pages/home"))?;
            assert_eq!(snap.data, Some(json!({"visits": 1})));

            // A competing transaction commits between our read and commit.
            store.transaction(|t2| {
                t2.set(&doc("pages/home"), json!({"visits": 99}));
                Ok::<_, StoreError>(())
            })?;

            t.set(&doc("pages/home"), json!({"visits": 2}));
            Ok::<_, StoreError>(())
        });

        assert!(matches!(result, Err(ref e) if e.is_conflict()));
        // The losing transaction left no trace.
        assert_eq!(read(&store, "pages/home"), Some(json!({"visits": 99})));
    }

    #[test]
    fn test_vanished_document_conflicts() {
        let store = MemoryStore::new();
        put(&store, "pages/home", json!({"visits": 1}));

        let result = store.transaction(|t| {
            t.get(&doc("pages/home"))?;
            store.transaction(|t2| {
                t2.delete(&doc("pages/home"));
                Ok::<_, StoreError>(())
            })?;
            t.merge(&doc("pages/home"), json!({"visits": 2}));
            Ok::<_, StoreError>(())
        });

        assert!(matches!(result, Err(ref e) if e.is_conflict()));
    }

    #[test]
    fn test_read_only_transactions_never_conflict() {
        let store = MemoryStore::new();
        put(&store, "pages/home", json!({"visits": 1}));

        let value = store
            .transaction(|t| {
                t.get(&doc("pages/home"))?;
                store.transaction(|t2| {
                    t2.set(&doc("pages/home"), json!({"visits": 2}));
                    Ok::<_, StoreError>(())
                })?;
                t.get(&doc("pages/home"))
            })
            .expect("read-only");
        // Second read still sees the newly committed value.
        assert_eq!(value.data, Some(json!({"visits": 2})));
    }

    #[test]
    fn test_error_from_body_discards_writes() {
        let store = MemoryStore::new();
        let result: Result<(), StoreError> = store.transaction(|t| {
            t.set(&doc("pages/home"), json!({"visits": 1}));
            Err(StoreError::Backend("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.is_empty());
    }
}
