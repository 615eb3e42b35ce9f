//! End-to-end walkthrough of the aggregation engine on the in-memory store.
//!
//! Run with: cargo run --example demo

use serde_json::json;

use sommatori::keys::DocPath;
use sommatori::store::{memory::MemoryStore, write_increment, DocumentStore, StoreError};
use sommatori::worker::SliceWorker;

const COL: &str = "_counter_shards_";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = MemoryStore::new();
    let counter = DocPath::new("pages/home");

    println!("writing 1000 increments as individual leaf shards...");
    for _ in 0..1000 {
        write_increment(&store, &counter, COL, json!({"amount": 1}))?;
    }
    println!("documents in store: {}", store.len());

    // Split the key space into two slices at the hex midpoint, the way an
    // external scheduler would, and drain the upper one first: everything
    // it folds lands in partial aggregates, the root stays untouched.
    let mid = format!("pages/home/{COL}/80000000-0000-0000-0000-000000000000");
    let upper = metadoc(&store, "workers/upper", &mid, "")?;
    let upper_stats = SliceWorker::new(&store, upper, COL)?.run()?;
    println!(
        "upper slice: {} shards folded in {} rounds",
        upper_stats.shards_aggregated, upper_stats.rounds
    );

    // The lower slice picks up its own leaves plus the partials the upper
    // worker produced, and folds the lot into the root counter.
    let lower = metadoc(&store, "workers/lower", "", &mid)?;
    let lower_stats = SliceWorker::new(&store, lower, COL)?.run()?;
    println!(
        "lower slice: {} shards folded in {} rounds",
        lower_stats.shards_aggregated, lower_stats.rounds
    );

    let root = store.transaction(|t| t.get(&counter))?;
    println!("root counter: {:?}", root.data());
    println!("documents in store: {}", store.len());

    #[cfg(feature = "table")]
    {
        use sommatori::report::StatsReport;
        let report = StatsReport::new();
        println!(
            "{}",
            report.render(
                [("upper", &upper_stats), ("lower", &lower_stats)].into_iter()
            )
        );
    }

    Ok(())
}

fn metadoc(store: &MemoryStore, path: &str, start: &str, end: &str) -> Result<DocPath, StoreError> {
    let metadoc = DocPath::new(path);
    store.transaction(|t| {
        t.set(
            &metadoc,
            json!({"slice": {"start": start, "end": end}, "timestamp": 1}),
        );
        Ok::<_, StoreError>(())
    })?;
    Ok(metadoc)
}
