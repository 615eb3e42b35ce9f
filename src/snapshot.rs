//! Point-in-time reads of shard documents.
//!
//! A [`ShardSnapshot`] pairs a document path with the data observed at read
//! time (`None` when the document does not exist). Snapshots are what the
//! planner groups and what the worker folds; they carry no liveness - a
//! snapshot can be stale the moment it is taken, which is why every plan
//! transaction re-reads its inputs before committing.

use serde_json::Value;

use crate::keys::DocPath;
use crate::update::{NumericUpdate, UPDATES_FIELD};

/// A partial shard whose [`UPDATES_FIELD`] array has grown past this many
/// records is compacted back to a single record on the next worker pass.
pub const COMPACTION_THRESHOLD: usize = 10;

/// One observed shard, partial, counter or metadata document.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardSnapshot {
    /// Full document path.
    pub path: DocPath,
    /// Observed contents; `None` if the document did not exist.
    pub data: Option<Value>,
}

impl ShardSnapshot {
    /// A snapshot of an existing document.
    pub fn new(path: impl Into<DocPath>, data: Value) -> Self {
        ShardSnapshot {
            path: path.into(),
            data: Some(data),
        }
    }

    /// A snapshot of a missing document.
    pub fn missing(path: impl Into<DocPath>) -> Self {
        ShardSnapshot {
            path: path.into(),
            data: None,
        }
    }

    /// Whether the document existed at read time.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Observed contents, if the document existed.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Iterates the `_data_` payloads of a partial shard's update records.
    ///
    /// Each record is one independent additive contribution; summing all of
    /// them yields the partial's current value. Yields nothing for leaf
    /// shards and missing documents.
    pub fn update_records(&self) -> impl Iterator<Item = &Value> {
        self.data
            .as_ref()
            .and_then(|data| data.get(UPDATES_FIELD))
            .and_then(Value::as_array)
            .map(|records| records.iter())
            .into_iter()
            .flatten()
            .filter_map(|record| record.get("_data_"))
    }
}

/// Whether a partial shard document carries no value and can be deleted.
///
/// True for an empty document and for a document holding only an
/// [`UPDATES_FIELD`] array whose records sum to zero. Any other field means
/// the document is not a pure partial and must not be cleaned up.
pub fn is_empty_partial(data: &Value) -> bool {
    let Some(fields) = data.as_object() else {
        return false;
    };
    if fields.len() > 1 {
        return false;
    }
    if fields.len() == 1 && !fields.contains_key(UPDATES_FIELD) {
        return false;
    }
    if fields.is_empty() {
        return true;
    }

    let mut update = NumericUpdate::new();
    if let Some(records) = fields.get(UPDATES_FIELD).and_then(Value::as_array) {
        for record in records {
            if let Some(data) = record.get("_data_") {
                update.merge_from(data);
            }
        }
    }
    update.is_noop()
}

/// Whether a partial shard's update array has grown past
/// [`COMPACTION_THRESHOLD`] and should be compacted.
pub fn has_many_updates(data: &Value) -> bool {
    data.get(UPDATES_FIELD)
        .and_then(Value::as_array)
        .is_some_and(|records| records.len() > COMPACTION_THRESHOLD)
}
