//! # Sommatori - Sharded Counter Aggregation for Document Stores
//!
//! A Rust library implementing the **sharded counter pattern** over a
//! transactional document store: arbitrarily write-heavy counters, spread
//! across many independent shard documents and folded back into a single
//! authoritative value by recurring aggregation workers.
//!
//! ## The Problem
//!
//! Document databases put a write-rate ceiling on every single document
//! (typically on the order of one sustained write per second). A counter
//! stored as one document caps out immediately: every increment from every
//! client contends on the same record, and past the ceiling writes start
//! failing or queueing.
//!
//! This is the document-store incarnation of the same contention problem a
//! single shared atomic counter has in a multi-threaded process - and the
//! cure is the same.
//!
//! ## The Solution: Sharded Counters
//!
//! Each increment writes its **own** shard document into a subcollection
//! next to the counter. Writers never touch a shared record, so write
//! throughput scales without bound. The cost moves to the read side: the
//! counter's true value is now scattered across the root document plus any
//! number of shards. A recurring **worker** folds the population back:
//!
//! ```text
//!   increments            shard documents              aggregation
//!
//!   caller 1 ──writes──►  ┌────────────────────────┐
//!   caller 2 ──writes──►  │ _counter_shards_/1f3a… │──┐
//!   caller 3 ──writes──►  │ _counter_shards_/8c02… │──┤  planner groups,
//!       ...               │ _counter_shards_/d119… │──┤  worker folds in
//!   caller N ──writes──►  │ ...                    │──┤  one transaction
//!                         └────────────────────────┘  │
//!                                                     ▼
//!                         ┌────────────────────────┐
//!                         │ pages/home  {count: N} │  root counter
//!                         └────────────────────────┘
//! ```
//!
//! Each worker is handed a **slice** - a contiguous shard-key range - and
//! drains it in bounded rounds. When a slice spans a whole leading-prefix
//! range, its shards collapse straight into the root counter; when it is a
//! narrow sub-range of a huge population, shards are first folded into
//! coarser **partial** aggregates (shards themselves, keyed to sort before
//! the leaves they absorbed) that later passes keep folding until only the
//! root remains. Every merge and its shard deletions commit in one
//! transaction, so no contribution is ever lost or double-counted - not
//! across worker crashes, not across workers racing on overlapping ranges.
//!
//! ## Quick Start
//!
//! ```rust
//! use sommatori::keys::DocPath;
//! use sommatori::store::{memory::MemoryStore, write_increment, DocumentStore, StoreError};
//! use sommatori::worker::SliceWorker;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new();
//! let counter = DocPath::new("pages/home");
//!
//! // Increment callers each write their own leaf shard - no contention.
//! for _ in 0..500 {
//!     write_increment(&store, &counter, "_counter_shards_", json!({"amount": 1}))?;
//! }
//!
//! // The scheduler assigns the whole key range to one worker...
//! let metadoc = DocPath::new("workers/w0");
//! store.transaction(|t| {
//!     t.set(&metadoc, json!({"slice": {"start": "", "end": ""}, "timestamp": 1}));
//!     Ok::<_, StoreError>(())
//! })?;
//!
//! // ...which folds every shard into the root counter.
//! let stats = SliceWorker::new(&store, metadoc, "_counter_shards_")?.run()?;
//! assert_eq!(stats.shards_aggregated, 500);
//!
//! let root = store.transaction(|t| t.get(&counter))?;
//! assert_eq!(root.data(), Some(&json!({"amount": 500})));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`keys`] | Document paths and the fixed-width shard key codec |
//! | [`update`] | Additive algebra over nested numeric documents |
//! | [`snapshot`] | Point-in-time shard reads and partial-health checks |
//! | [`planner`] | Pure grouping of a slice's shards into aggregation plans |
//! | [`store`] | Transactional store traits + in-memory reference store |
//! | [`worker`] | Slice execution: fold, delete, retry, report |
//! | [`stats`] | Per-run statistics for the external scheduler |
//!
//! ## Consistency Model
//!
//! The engine is eventually consistent and conservation-exact: at any
//! instant, root value + partial aggregates + remaining leaf shards equals
//! the sum of every increment ever written. Workers coordinate exclusively
//! through the store's optimistic transactions; a conflicted fold is
//! retried with exponential backoff and a slice that cannot make progress
//! fails cleanly for the scheduler to re-issue. Aggregation is commutative
//! and associative over the contributed amounts, so slices may run in any
//! order and any degree of parallelism.
//!
//! ## Observers
//!
//! The optional `table` feature pulls in the `tabled` crate and adds the
//! [`report`] module for pretty-printing fleets of worker stats:
//!
//! ```toml
//! [dependencies]
//! sommatori = { version = "0.2", features = ["table"] }
//! ```

pub mod keys;
pub mod planner;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod update;
pub mod worker;

#[cfg(feature = "table")]
pub mod report;
