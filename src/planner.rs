//! Groups a slice's shard snapshots into per-target aggregation plans.
//!
//! Given the ordered list of shard snapshots a worker read from its slice,
//! [`plan_aggregations`] decides, purely from the slice boundaries, where
//! each snapshot's value must flow:
//!
//! - when the slice already spans a whole leading-prefix range, everything
//!   collapses straight into the root counter document;
//! - when the slice is a narrow sub-range of a much larger shard population,
//!   snapshots are grouped under coarser *partial* aggregates first, so each
//!   transaction stays bounded regardless of total shard cardinality.
//!
//! Every pass strictly shortens the effective prefix depth of the keys it
//! touches, so repeated passes converge the whole population onto the root.
//!
//! Planning is a pure function of its inputs: no storage access, no clock,
//! no state. The same snapshots and the same `start` bound always produce
//! the same plans.

use crate::keys::{decode_shard, encode_shard, is_partial_shard, DocPath, WIDTH};
use crate::snapshot::ShardSnapshot;

/// One output document and the snapshots to fold into it.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    /// Path of the document receiving the fold.
    pub aggregate: DocPath,
    /// Whether the target is an intermediate partial aggregate rather than
    /// the root counter.
    pub is_partial: bool,
    /// Leaf shard snapshots assigned to this plan, in ascending key order.
    pub shards: Vec<ShardSnapshot>,
    /// Partial shard snapshots assigned to this plan, in ascending key order.
    pub partials: Vec<ShardSnapshot>,
}

/// Partitions `snaps` into aggregation plans.
///
/// `snaps` must be sorted ascending by document path (the order range
/// queries return). `start` is the slice's opening bound; the empty string
/// means the slice has no lower bound, in which case everything aggregates
/// to its root counter.
///
/// Every input snapshot lands in exactly one returned plan, and plans come
/// back in ascending target order. An empty input yields an empty plan list.
///
/// # Examples
///
/// ```rust
/// use sommatori::planner::plan_aggregations;
/// use sommatori::snapshot::ShardSnapshot;
/// use serde_json::json;
///
/// let snaps = vec![
///     ShardSnapshot::new("pages/home/shards/4f1c9", json!({"amount": 1})),
///     ShardSnapshot::new("pages/home/shards/9a0d2", json!({"amount": 2})),
/// ];
/// let plans = plan_aggregations("", snaps);
/// assert_eq!(plans.len(), 1);
/// assert_eq!(plans[0].aggregate.as_str(), "pages/home");
/// assert!(!plans[0].is_partial);
/// ```
pub fn plan_aggregations(start: &str, mut snaps: Vec<ShardSnapshot>) -> Vec<AggregationPlan> {
    let Some(last) = snaps.last() else {
        return Vec::new();
    };

    let prefix_len = aggregation_prefix_len(start, &last.path);
    let (mut aggregate, mut is_partial) = target_for(&last.path, prefix_len);

    let mut result = Vec::new();
    let mut shards: Vec<ShardSnapshot> = Vec::new();
    let mut partials: Vec<ShardSnapshot> = Vec::new();

    // Scan from the last snapshot backwards; the boundary group (the only
    // one that can straddle the slice's start bound) is then handled first.
    while let Some(snap) = snaps.pop() {
        let (new_aggregate, new_is_partial) = target_for(&snap.path, prefix_len);
        if new_aggregate != aggregate {
            shards.reverse();
            partials.reverse();
            result.push(AggregationPlan {
                aggregate: std::mem::replace(&mut aggregate, new_aggregate),
                is_partial: std::mem::replace(&mut is_partial, new_is_partial),
                shards: std::mem::take(&mut shards),
                partials: std::mem::take(&mut partials),
            });
        }
        if is_partial_shard(&snap.path) {
            partials.push(snap);
        } else {
            shards.push(snap);
        }
    }
    shards.reverse();
    partials.reverse();
    result.push(AggregationPlan {
        aggregate,
        is_partial,
        shards,
        partials,
    });
    result.reverse();
    result
}

/// Shared-prefix length between the slice's `start` bound and the last
/// snapshot's path, capped at `WIDTH - 1`.
///
/// Zero (meaning "aggregate to the root") when `start` is empty, when the
/// two documents live in different collections, or when their decoded keys
/// differ in length.
fn aggregation_prefix_len(start: &str, end: &DocPath) -> usize {
    if start.is_empty() {
        return 0;
    }
    let start = DocPath::new(start);
    if start.parent() != end.parent() {
        return 0;
    }

    let a = decode_shard(start.leaf());
    let b = decode_shard(end.leaf());
    if a.len() != b.len() {
        return 0;
    }

    let cap = WIDTH - 1;
    for (i, (x, y)) in a.bytes().zip(b.bytes()).take(cap).enumerate() {
        if x != y {
            return i + 1;
        }
    }
    cap
}

/// Computes the aggregation target for one shard path under a fixed prefix
/// length.
///
/// With a zero prefix the target is the root counter - the shard's
/// grandparent document, two levels up past the shard collection. Otherwise
/// the target is a coarser partial shard in the same collection, with the
/// prefix shrunk by one when the decoded key is no longer than the prefix,
/// so that repeated passes always make forward progress.
fn target_for(shard: &DocPath, prefix_len: usize) -> (DocPath, bool) {
    if prefix_len == 0 {
        let root = shard
            .parent()
            .and_then(|collection| collection.parent())
            .unwrap_or_default();
        return (root, false);
    }

    let collection = shard.parent().unwrap_or_default();
    let key = decode_shard(shard.leaf());

    let mut prefix_len = prefix_len;
    if key.len() <= prefix_len {
        prefix_len -= 1;
    }

    let prefix: String = key.chars().take(prefix_len.min(WIDTH - 1)).collect();
    (collection.child(&encode_shard(&prefix)), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const COL: &str = "pages/home/_counter_shards_";

    fn leaf(key: &str) -> ShardSnapshot {
        ShardSnapshot::new(format!("{COL}/{key}"), json!({"amount": 1}))
    }

    fn partial(key: &str) -> ShardSnapshot {
        ShardSnapshot::new(
            format!("{COL}/{key}"),
            json!({"_updates_": [{"_id_": "0", "_data_": {"amount": 2}}]}),
        )
    }

    fn all_paths(plans: &[AggregationPlan]) -> Vec<String> {
        let mut paths: Vec<String> = plans
            .iter()
            .flat_map(|p| p.shards.iter().chain(p.partials.iter()))
            .map(|s| s.path.as_str().to_string())
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_empty_input_yields_empty_plan() {
        assert_eq!(plan_aggregations("", Vec::new()), Vec::new());
    }

    #[test]
    fn test_boundary_slice_collapses_to_root() {
        // A slice whose start shares nothing with its contents folds
        // everything, partials included, straight into the root counter.
        let snaps = vec![
            partial("\t\t012"),
            leaf("012345678"),
            leaf("123456789"),
            leaf("23456789a"),
        ];
        let plans = plan_aggregations("\t", snaps);

        assert_eq!(plans.len(), 1);
        let plan = &plans[0];
        assert_eq!(plan.aggregate.as_str(), "pages/home");
        assert!(!plan.is_partial);
        assert_eq!(
            plan.shards.iter().map(|s| s.path.leaf()).collect::<Vec<_>>(),
            vec!["012345678", "123456789", "23456789a"]
        );
        assert_eq!(
            plan.partials.iter().map(|s| s.path.leaf()).collect::<Vec<_>>(),
            vec!["\t\t012"]
        );
    }

    #[test]
    fn test_wide_slice_groups_by_counter() {
        // No lower bound: every snapshot goes to its own counter's root,
        // one plan per counter, in ascending target order.
        let snaps = vec![
            ShardSnapshot::new("pages/about/shards/11111", json!({"n": 1})),
            ShardSnapshot::new("pages/about/shards/22222", json!({"n": 1})),
            ShardSnapshot::new("pages/home/shards/33333", json!({"n": 1})),
        ];
        let plans = plan_aggregations("", snaps);

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].aggregate.as_str(), "pages/about");
        assert_eq!(plans[1].aggregate.as_str(), "pages/home");
        assert!(plans.iter().all(|p| !p.is_partial));
        assert_eq!(plans[0].shards.len(), 2);
        assert_eq!(plans[1].shards.len(), 1);
    }

    #[test]
    fn test_narrow_slice_targets_partials_only() {
        // start and the end key share "ab" and first differ at index 2, so
        // the prefix length is 3 and every group targets a 3-character
        // partial; the root counter is never touched.
        let snaps = vec![leaf("ab100"), leaf("ab10x"), leaf("ab200"), leaf("ab311")];
        let plans = plan_aggregations(&format!("{COL}/ab000"), snaps);

        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| p.is_partial));
        assert_eq!(plans[0].aggregate.as_str(), format!("{COL}/\t\tab1"));
        assert_eq!(plans[1].aggregate.as_str(), format!("{COL}/\t\tab2"));
        assert_eq!(plans[2].aggregate.as_str(), format!("{COL}/\t\tab3"));
        assert_eq!(plans[0].shards.len(), 2);
    }

    #[test]
    fn test_partials_shrink_their_prefix() {
        // A partial whose decoded key is as short as the prefix length gets
        // a strictly coarser target, so repeated passes always terminate.
        let snaps = vec![partial("\t\tab1"), partial("\t\tab9")];
        let plans = plan_aggregations(&format!("{COL}/\t\tab0"), snaps);

        assert_eq!(plans.len(), 1);
        assert!(plans[0].is_partial);
        assert_eq!(plans[0].aggregate.as_str(), format!("{COL}/\t\t\tab"));
        assert_eq!(plans[0].partials.len(), 2);
        assert!(plans[0].shards.is_empty());
    }

    #[test]
    fn test_prefix_len_rules() {
        let end = DocPath::new(format!("{COL}/abcde"));
        // Empty start: root aggregation.
        assert_eq!(aggregation_prefix_len("", &end), 0);
        // Different collection: root aggregation.
        assert_eq!(
            aggregation_prefix_len("pages/other/shards/abcde", &end),
            0
        );
        // Different decoded lengths: root aggregation.
        assert_eq!(aggregation_prefix_len(&format!("{COL}/\t\tabc"), &end), 0);
        // First difference at index i gives i + 1.
        assert_eq!(aggregation_prefix_len(&format!("{COL}/axcde"), &end), 2);
        // Identical up to the cap.
        assert_eq!(aggregation_prefix_len(&format!("{COL}/abcdz"), &end), 4);
        assert_eq!(aggregation_prefix_len(&format!("{COL}/abcde"), &end), 4);
    }

    #[test]
    fn test_plans_partition_input_exactly() {
        let snaps = vec![
            partial("\t\tab1"),
            leaf("ab100"),
            leaf("ab1zz"),
            leaf("ab200"),
            leaf("ab3aa"),
        ];
        let expected = {
            let mut paths: Vec<String> =
                snaps.iter().map(|s| s.path.as_str().to_string()).collect();
            paths.sort();
            paths
        };
        let plans = plan_aggregations(&format!("{COL}/ab000"), snaps);
        assert_eq!(all_paths(&plans), expected);

        let mut targets: Vec<&str> = plans.iter().map(|p| p.aggregate.as_str()).collect();
        let mut sorted = targets.clone();
        sorted.sort();
        assert_eq!(targets, sorted);
        targets.dedup();
        assert_eq!(targets.len(), plans.len());
    }

    #[test]
    fn test_planning_is_deterministic() {
        let snaps = || {
            vec![
                partial("\t\tab1"),
                leaf("ab100"),
                leaf("ab200"),
                leaf("ab311"),
            ]
        };
        let start = format!("{COL}/ab000");
        assert_eq!(
            plan_aggregations(&start, snaps()),
            plan_aggregations(&start, snaps())
        );
    }
}
