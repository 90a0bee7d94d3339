//! Node Topology & Routing
//!
//! Resolves where a model's documents live and which node a given shard-key value belongs to.
//!
//! ## Core Concepts
//! - **DatabaseNode**: one database on one physical store, with a `pos` marker in shard-key
//!   space and a cache of open collection handles.
//! - **Sorted range partitioning**: nodes are ordered by `pos`; a key goes to the first node
//!   whose `pos` is >= the key, wrapping to the first node past the end.
//! - **Control plane**: one tracker record per collection (and per secondary shard) lists the
//!   nodes. Records are read once at registration; a missing record falls back to one default
//!   node and is written back.

pub mod database_node;
pub mod router;
pub mod tracker;
pub mod types;

pub use database_node::DatabaseNode;
pub use router::ShardRouter;
pub use tracker::{CollectionTracker, ControlPlane, TRACKER_COLLECTION};
pub use types::{Connector, NodeConfig};
