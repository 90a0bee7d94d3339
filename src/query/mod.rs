//! Query Engine
//!
//! Answers queries over a model whose documents are spread across nodes and copies.
//!
//! ## Core Concepts
//! - **Planning**: a top-level disjunction is split into branches. Each branch goes to the
//!   primary shards its filter pins, else to the first secondary shard that covers every filter
//!   and sort field, else to every primary node.
//! - **Fan-out**: one tokio task per target collection streams sorted results through a bounded
//!   channel.
//! - **Merge**: a lazy k-way heap merge yields the union in sort order.
//! - **Rehydration**: secondary copies are swapped for their primary documents in batches.
//! - **Guards**: offsets are ignored across collections and unbounded scans are capped.

pub mod engine;
pub mod merge;
pub mod planner;
pub mod types;

pub use engine::QueryCursor;
pub use merge::HeapMerge;
pub use planner::{QueryPlan, SubQuery};
pub use types::{QueryRequest, QuerySource};

#[cfg(test)]
mod tests;
