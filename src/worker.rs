//! Executes one slice assignment end-to-end against the backing store.
//!
//! A [`SliceWorker`] is created from a metadata document holding its
//! [`Slice`] - the `[start, end)` shard-key range this invocation owns -
//! and drains that range in query-limited rounds: read the shards currently
//! in range, ask the planner how to group them, fold each group into its
//! target inside one transaction, and delete the consumed documents in that
//! same transaction. Repeated invocations converge an arbitrarily large
//! shard population onto the root counter.
//!
//! Per slice the worker moves through
//! `Pending -> InTransaction -> {Committed | Conflicted | Failed}`:
//! a conflicted transaction loops back with exponential backoff up to a
//! bounded attempt budget, a committed plan resets that budget, and failure
//! is terminal for this invocation - the scheduler re-issues the slice
//! later. Nothing is ever half-applied: a merge and its shard deletions
//! commit together or not at all, so a crash at any point leaves either the
//! pre-merge state or the fully merged state.
//!
//! The metadata document doubles as an ownership guard, in the manner of a
//! lease: every plan transaction re-reads it and bails out if it changed,
//! so a reassigned or re-issued slice cannot be aggregated twice.

use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::keys::DocPath;
use crate::planner::{plan_aggregations, AggregationPlan};
use crate::snapshot::{has_many_updates, is_empty_partial, ShardSnapshot};
use crate::stats::WorkerStats;
use crate::store::{DocumentStore, StoreError, Transaction};
use crate::update::{new_record_id, NumericUpdate, UPDATES_FIELD};

/// Shard documents read per aggregation round by default.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Default bound on consecutive conflicted transactions before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay after a conflict; doubles per attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(20);

/// Ceiling on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// The contiguous key range one worker invocation is responsible for.
///
/// Bounds are full document paths; `start` is inclusive, `end` exclusive,
/// and an empty string leaves that side unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    /// First document path in the slice (inclusive).
    pub start: String,
    /// Document path just past the slice (exclusive).
    pub end: String,
}

/// Contents of a worker's metadata document.
///
/// The scheduler writes one of these per worker; bumping `timestamp`
/// re-issues the slice and revokes any still-running invocation through the
/// ownership guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetadata {
    /// The assigned shard range.
    pub slice: Slice,
    /// Stamped by the scheduler when the slice was (re)issued.
    #[serde(default)]
    pub timestamp: u64,
}

/// Errors surfaced by a slice run.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The slice bounds are inverted or point outside the shard collection.
    /// Caller error; never retried.
    #[error("malformed slice bounds {start:?}..{end:?}")]
    MalformedSlice {
        /// The slice's opening bound.
        start: String,
        /// The slice's closing bound.
        end: String,
    },

    /// No metadata document at the given path.
    #[error("no worker metadata document at {0}")]
    MissingMetadata(DocPath),

    /// The metadata document exists but does not parse.
    #[error("worker metadata at {path} does not parse")]
    BadMetadata {
        /// Path of the offending document.
        path: DocPath,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// The metadata document changed: the slice was reassigned and this
    /// invocation no longer owns it.
    #[error("slice metadata changed underneath the worker")]
    OwnershipLost,

    /// Too many consecutive conflicted transactions. The scheduler should
    /// re-issue the slice later.
    #[error("aggregation gave up after {attempts} conflicted attempts")]
    RetriesExhausted {
        /// Conflicted attempts performed.
        attempts: u32,
    },

    /// The caller-supplied deadline elapsed before the slice drained.
    /// Retryable: re-issue the slice.
    #[error("slice deadline exceeded")]
    DeadlineExceeded,

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for worker operations.
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Aggregates one slice of a counter's shard population.
pub struct SliceWorker<'s, S: DocumentStore> {
    store: &'s S,
    metadoc: DocPath,
    metadata: WorkerMetadata,
    metadata_raw: Value,
    collection_id: String,
    query_limit: usize,
    max_attempts: u32,
    backoff_base: Duration,
    deadline: Option<Duration>,
}

impl<'s, S: DocumentStore> SliceWorker<'s, S> {
    /// Loads the worker's assignment from its metadata document.
    ///
    /// `collection_id` names the shard subcollections this worker
    /// aggregates (every counter uses the same collection name).
    pub fn new(
        store: &'s S,
        metadoc: DocPath,
        collection_id: impl Into<String>,
    ) -> Result<Self> {
        let snap = store.transaction(|t| Ok::<_, WorkerError>(t.get(&metadoc)?))?;
        let raw = snap
            .data
            .ok_or_else(|| WorkerError::MissingMetadata(metadoc.clone()))?;
        let metadata: WorkerMetadata =
            serde_json::from_value(raw.clone()).map_err(|source| WorkerError::BadMetadata {
                path: metadoc.clone(),
                source,
            })?;
        Ok(SliceWorker {
            store,
            metadoc,
            metadata,
            metadata_raw: raw,
            collection_id: collection_id.into(),
            query_limit: DEFAULT_QUERY_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            deadline: None,
        })
    }

    /// Caps how many shard documents one aggregation round reads.
    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit.max(1);
        self
    }

    /// Bounds consecutive conflicted transactions before the run fails.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the first backoff delay after a conflict (doubles per attempt).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Bounds the whole run; overrunning surfaces
    /// [`WorkerError::DeadlineExceeded`].
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The assigned slice.
    pub fn slice(&self) -> &Slice {
        &self.metadata.slice
    }

    /// Drains the assigned slice and reports what was aggregated.
    ///
    /// Runs until a range query comes back empty, then writes the returned
    /// [`WorkerStats`] back onto the metadata document (when this
    /// invocation still owns it).
    pub fn run(&self) -> Result<WorkerStats> {
        self.validate_slice()?;
        let deadline = self.deadline.map(|d| Instant::now() + d);

        let mut all_paths: Vec<String> = Vec::new();
        let mut rounds = 0u32;
        let mut rounds_capped = 0u32;
        let mut attempts = 0u32;

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(WorkerError::DeadlineExceeded);
            }

            let slice = &self.metadata.slice;
            let snaps = self.store.transaction(|t| {
                Ok::<_, WorkerError>(t.query_range(
                    &self.collection_id,
                    &slice.start,
                    &slice.end,
                    self.query_limit,
                )?)
            })?;
            if snaps.is_empty() {
                break;
            }

            rounds += 1;
            if snaps.len() == self.query_limit {
                rounds_capped += 1;
            }

            let (to_aggregate, to_cleanup) = categorize(snaps);

            // Cleanup first: no-op partials never reach the planner, and
            // compaction preserves sums, so plan transactions re-reading
            // their inputs still observe the value they will fold.
            let cleanup_actions = self.cleanup_partials(&to_cleanup);

            let plans = plan_aggregations(&slice.start, to_aggregate);
            if plans.is_empty() && cleanup_actions == 0 {
                break;
            }

            for plan in &plans {
                match self.execute_plan(plan) {
                    Ok(paths) => {
                        all_paths.extend(paths);
                        attempts = 0;
                    }
                    Err(WorkerError::Store(err)) if err.is_conflict() => {
                        attempts += 1;
                        warn!(
                            aggregate = %plan.aggregate,
                            attempts,
                            "aggregation transaction conflicted, retrying slice"
                        );
                        if attempts >= self.max_attempts {
                            return Err(WorkerError::RetriesExhausted { attempts });
                        }
                        thread::sleep(backoff_delay(self.backoff_base, attempts));
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        all_paths.sort();
        let stats = WorkerStats {
            last_successful_run: now_millis(),
            shards_aggregated: all_paths.len(),
            splits: WorkerStats::sample_splits(&all_paths),
            rounds,
            rounds_capped,
        };
        self.write_stats(&stats);
        Ok(stats)
    }

    fn validate_slice(&self) -> Result<()> {
        let Slice { start, end } = &self.metadata.slice;
        let malformed = || WorkerError::MalformedSlice {
            start: start.clone(),
            end: end.clone(),
        };
        if !start.is_empty() && !end.is_empty() && start > end {
            return Err(malformed());
        }
        for bound in [start, end] {
            if !bound.is_empty()
                && DocPath::new(bound.as_str()).collection_id()
                    != Some(self.collection_id.as_str())
            {
                return Err(malformed());
            }
        }
        Ok(())
    }

    /// Folds one plan into its target and deletes the consumed documents,
    /// all in a single transaction.
    ///
    /// Every input is re-read inside the transaction: the planning-time
    /// snapshots only determined the grouping, the folded values are the
    /// ones observed here. An input that vanished since planning aborts
    /// with a conflict so the slice is re-planned from fresh reads.
    fn execute_plan(&self, plan: &AggregationPlan) -> Result<Vec<String>> {
        self.store.transaction(|t| {
            let metadoc = t.get(&self.metadoc)?;
            if metadoc.data.as_ref() != Some(&self.metadata_raw) {
                warn!(metadoc = %self.metadoc, "metadata changed, bailing out");
                return Err(WorkerError::OwnershipLost);
            }

            let counter = if plan.is_partial {
                None
            } else {
                Some(t.get(&plan.aggregate)?)
            };

            let mut folded = NumericUpdate::new();
            let mut paths = Vec::with_capacity(plan.shards.len() + plan.partials.len());

            for snap in &plan.shards {
                let fresh = t.get(&snap.path)?;
                let Some(data) = fresh.data() else {
                    return Err(StoreError::Conflict {
                        path: snap.path.clone(),
                    }
                    .into());
                };
                folded.merge_from(data);
                paths.push(snap.path.as_str().to_string());
            }
            for snap in &plan.partials {
                let fresh = t.get(&snap.path)?;
                if !fresh.exists() {
                    return Err(StoreError::Conflict {
                        path: snap.path.clone(),
                    }
                    .into());
                }
                for record in fresh.update_records() {
                    folded.merge_from(record);
                }
                paths.push(snap.path.as_str().to_string());
            }

            if plan.is_partial {
                if !folded.is_noop() {
                    t.append_update(&plan.aggregate, folded.to_partial_record(&new_record_id()));
                }
            } else {
                let empty = json!({});
                let existing = counter
                    .as_ref()
                    .and_then(ShardSnapshot::data)
                    .unwrap_or(&empty);
                let patch = folded.to_counter_update(existing);
                if patch.as_object().is_some_and(|fields| !fields.is_empty()) {
                    t.merge(&plan.aggregate, patch);
                }
            }

            for snap in plan.shards.iter().chain(plan.partials.iter()) {
                t.delete(&snap.path);
            }

            debug!(
                aggregate = %plan.aggregate,
                folded = paths.len(),
                is_partial = plan.is_partial,
                "plan committed"
            );
            Ok(paths)
        })
    }

    /// Deletes no-op partials and compacts oversized update histories.
    ///
    /// Each document gets its own transaction; a document that vanished or
    /// conflicted is skipped - cleanup is maintenance, never required for
    /// correctness. Returns how many documents were actually touched.
    fn cleanup_partials(&self, to_cleanup: &[ShardSnapshot]) -> usize {
        let mut actions = 0;
        for snap in to_cleanup {
            let outcome = self.store.transaction(|t| {
                let fresh = t.get(&snap.path)?;
                let Some(data) = fresh.data() else {
                    return Ok::<_, WorkerError>(false);
                };
                if is_empty_partial(data) {
                    t.delete(&snap.path);
                    return Ok(true);
                }
                if data.get(UPDATES_FIELD).is_none() {
                    // Not a partial any more; leave it to aggregation.
                    return Ok(false);
                }
                let mut folded = NumericUpdate::new();
                for record in fresh.update_records() {
                    folded.merge_from(record);
                }
                t.set(&snap.path, folded.as_partial_shard(&new_record_id()));
                Ok(true)
            });
            match outcome {
                Ok(true) => actions += 1,
                Ok(false) => {}
                Err(err) => {
                    debug!(partial = %snap.path, error = %err, "partial cleanup skipped");
                }
            }
        }
        actions
    }

    /// Records the run's stats on the metadata document, guarded by the
    /// same ownership check as aggregation. Failure is logged, not fatal.
    fn write_stats(&self, stats: &WorkerStats) {
        let Ok(stats_value) = serde_json::to_value(stats) else {
            return;
        };
        let result = self.store.transaction(|t| {
            let metadoc = t.get(&self.metadoc)?;
            if metadoc.data.as_ref() == Some(&self.metadata_raw) {
                t.merge(
                    &self.metadoc,
                    json!({ "timestamp": now_millis(), "stats": stats_value }),
                );
            }
            Ok::<_, StoreError>(())
        });
        if let Err(err) = result {
            debug!(error = %err, "failed to save worker stats");
        }
    }
}

/// Splits a round's snapshots into what gets aggregated and what gets
/// cleaned up. No-op partials are cleanup-only; partials with an oversized
/// update history are compacted *and* aggregated; everything else just
/// aggregates.
fn categorize(snaps: Vec<ShardSnapshot>) -> (Vec<ShardSnapshot>, Vec<ShardSnapshot>) {
    let mut to_aggregate = Vec::new();
    let mut to_cleanup = Vec::new();
    for snap in snaps {
        let Some(data) = snap.data() else {
            continue;
        };
        if is_empty_partial(data) {
            to_cleanup.push(snap);
        } else if has_many_updates(data) {
            to_cleanup.push(snap.clone());
            to_aggregate.push(snap);
        } else {
            to_aggregate.push(snap);
        }
    }
    (to_aggregate, to_cleanup)
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(10);
    (base * factor).min(MAX_BACKOFF)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
