//! Additive update algebra over nested numeric documents.
//!
//! Every value flowing through the engine - leaf shard contents, partial
//! shard update records, root counter contents - is a JSON document whose
//! numeric leaves carry counter state. [`NumericUpdate`] accumulates such
//! documents additively and exports the two write shapes the engine needs:
//! an absolute merge-patch for the root counter, and an `_updates_` record
//! for a partial shard.
//!
//! The algebra is deliberately permissive: non-numeric leaves are ignored,
//! and a kind mismatch (number vs. object) overwrites the accumulated node.
//! This keeps aggregation total over whatever documents increment callers
//! produced.
//!
//! # Examples
//!
//! ```rust
//! use sommatori::update::NumericUpdate;
//! use serde_json::json;
//!
//! let mut update = NumericUpdate::default();
//! update.merge_from(&json!({"visits": 2, "stats": {"cnt": 1}}));
//! update.merge_from(&json!({"visits": 1}));
//!
//! assert_eq!(
//!     update.to_counter_update(&json!({"visits": 4})),
//!     json!({"visits": 7, "stats": {"cnt": 1}})
//! );
//! ```

use serde_json::{json, Map, Number, Value};
use uuid::Uuid;

/// Field holding the array of pending update records on a partial shard.
pub const UPDATES_FIELD: &str = "_updates_";

/// Generates a fresh identifier for a partial update record.
///
/// Record ids only have to be unique within one partial's `_updates_` array;
/// they exist so that stores deduplicating array elements never collapse two
/// identical contributions into one.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// An additive accumulator over nested numeric documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericUpdate {
    data: Map<String, Value>,
}

impl NumericUpdate {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every numeric leaf of `from` into the accumulator.
    ///
    /// Non-numeric leaves are ignored. When the accumulated node and the
    /// incoming node disagree on kind (number vs. object), the incoming
    /// kind wins and the accumulated node is overwritten.
    pub fn merge_from(&mut self, from: &Value) {
        if let Value::Object(from) = from {
            merge_recursive(from, &mut self.data, false);
        }
    }

    /// Subtracts every numeric leaf of `from` out of the accumulator.
    ///
    /// The inverse walk of [`merge_from`](Self::merge_from), with the same
    /// kind-mismatch rules.
    pub fn subtract_from(&mut self, from: &Value) {
        if let Value::Object(from) = from {
            merge_recursive(from, &mut self.data, true);
        }
    }

    /// Exports an absolute merge-patch for the root counter document.
    ///
    /// Numeric leaves present in both the accumulator and `counter` are
    /// summed; leaves only the accumulator carries are taken as-is. Fields
    /// the accumulator never touched are left to the store's merge write to
    /// preserve.
    pub fn to_counter_update(&self, counter: &Value) -> Value {
        let mut data = self.data.clone();
        if let Value::Object(counter) = counter {
            add_common_fields_recursive(counter, &mut data);
        }
        Value::Object(data)
    }

    /// Exports one `{_id_, _data_}` record for a partial shard's
    /// [`UPDATES_FIELD`] array.
    pub fn to_partial_record(&self, id: &str) -> Value {
        json!({ "_id_": id, "_data_": Value::Object(self.data.clone()) })
    }

    /// Exports a whole compacted partial shard document holding exactly one
    /// record.
    pub fn as_partial_shard(&self, id: &str) -> Value {
        json!({ UPDATES_FIELD: [self.to_partial_record(id)] })
    }

    /// True iff the accumulator carries no information: every leaf is a
    /// numeric zero and nothing non-numeric sneaked in.
    pub fn is_noop(&self) -> bool {
        fields_are_noop(&self.data)
    }
}

fn merge_recursive(from: &Map<String, Value>, to: &mut Map<String, Value>, subtract: bool) {
    for (key, value) in from {
        match value {
            Value::Number(n) => {
                let incoming = if subtract { negate(n) } else { n.clone() };
                let merged = match to.get(key) {
                    Some(Value::Number(existing)) => add_numbers(existing, &incoming),
                    _ => incoming,
                };
                to.insert(key.clone(), Value::Number(merged));
            }
            Value::Object(nested) => {
                let slot = to.entry(key.clone()).or_insert_with(|| json!({}));
                if !slot.is_object() {
                    *slot = json!({});
                }
                if let Value::Object(slot) = slot {
                    merge_recursive(nested, slot, subtract);
                }
            }
            _ => {}
        }
    }
}

fn add_common_fields_recursive(from: &Map<String, Value>, to: &mut Map<String, Value>) {
    for (key, slot) in to.iter_mut() {
        match (slot, from.get(key)) {
            (Value::Number(acc), Some(Value::Number(existing))) => {
                *acc = add_numbers(existing, acc);
            }
            (Value::Object(acc), Some(Value::Object(existing))) => {
                add_common_fields_recursive(existing, acc);
            }
            _ => {}
        }
    }
}

/// Adds two JSON numbers, keeping integer representation where possible and
/// falling back to `f64` on overflow or mixed kinds.
fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Number::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| Number::from(0))
}

fn negate(n: &Number) -> Number {
    if let Some(x) = n.as_i64() {
        if let Some(negated) = x.checked_neg() {
            return Number::from(negated);
        }
    }
    Number::from_f64(-n.as_f64().unwrap_or(0.0)).unwrap_or_else(|| Number::from(0))
}

fn fields_are_noop(fields: &Map<String, Value>) -> bool {
    fields.values().all(|value| match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Object(nested) => fields_are_noop(nested),
        _ => false,
    })
}
