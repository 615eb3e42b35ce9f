//! Statistics a worker reports after draining its slice.
//!
//! Stats are written back onto the worker's metadata document so an external
//! controller can observe throughput and rebalance slices: `splits` samples
//! the aggregated shard paths at a fixed stride, giving the controller
//! ready-made cut points for subdividing a hot range.

use serde::{Deserialize, Serialize};

/// Stride at which aggregated shard paths are sampled into
/// [`WorkerStats::splits`].
pub const SPLIT_SAMPLE_STRIDE: usize = 100;

/// Outcome of one successful slice run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Milliseconds since the Unix epoch at the end of the run.
    pub last_successful_run: u64,
    /// Total shard and partial documents folded into their targets.
    pub shards_aggregated: usize,
    /// Every [`SPLIT_SAMPLE_STRIDE`]-th aggregated path, in ascending order.
    pub splits: Vec<String>,
    /// Aggregation rounds executed.
    pub rounds: u32,
    /// Rounds whose range query came back full, i.e. the slice held more
    /// shards than one round could see.
    pub rounds_capped: u32,
}

impl WorkerStats {
    /// Samples split points from the full list of aggregated paths.
    ///
    /// `paths` must be sorted ascending; the first path is never sampled so
    /// a split point always has work on both sides.
    pub fn sample_splits(paths: &[String]) -> Vec<String> {
        paths
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != 0 && idx % SPLIT_SAMPLE_STRIDE == 0)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_splits_takes_every_stride() {
        let paths: Vec<String> = (0..250).map(|i| format!("shards/{i:05}")).collect();
        let splits = WorkerStats::sample_splits(&paths);
        assert_eq!(splits, vec![paths[100].clone(), paths[200].clone()]);
    }

    #[test]
    fn test_sample_splits_short_input() {
        let paths: Vec<String> = (0..100).map(|i| format!("shards/{i:05}")).collect();
        assert!(WorkerStats::sample_splits(&paths).is_empty());
        assert!(WorkerStats::sample_splits(&[]).is_empty());
    }

    #[test]
    fn test_round_trips_through_json() {
        let stats = WorkerStats {
            last_successful_run: 1700000000000,
            shards_aggregated: 42,
            splits: vec!["a/b/c".into()],
            rounds: 3,
            rounds_capped: 1,
        };
        let value = serde_json::to_value(&stats).expect("serialize");
        let back: WorkerStats = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, stats);
    }
}
