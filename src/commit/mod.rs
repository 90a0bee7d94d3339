//! Commit & Update Engine
//!
//! Turns an instance's pending changes into durable writes on the primary shard and keeps the
//! secondary shards in line.
//!
//! ## Core Concepts
//! - **Insert**: the folded pending document is stamped with `_id` and a version and written
//!   to the node its shard key routes to. With `force`, a duplicate identity adopts the stored
//!   document and continues as an update.
//! - **Optimistic concurrency**: updates match on identity plus the last known version. When
//!   another writer moved the version, the instance is rebased onto the stored document and the
//!   write retried with jittered exponential backoff. An unchanged version means the caller's
//!   conditions failed and the commit reports `false`.
//! - **Migration**: a shard key change that routes to another node inserts there and deletes
//!   the old copy.
//! - **Transactions**: models with secondary shards write through a call-scoped [`TxnScope`]
//!   holding one session per store; transient failures retry the whole transaction.
//! - **Delete**: removes the primary document, every secondary copy and the cached entry.

pub mod delete;
pub mod engine;
pub mod transaction;

pub use engine::{CommitOptions, commit};
pub use transaction::TxnScope;

#[cfg(test)]
mod tests;
