//! Distributed Document Mapper Library
//!
//! Client-side sharding and replication over a document store. Models declare typed
//! attributes and indexes; their documents are spread over several database nodes by a shard
//! key, optionally copied into secondary shards keyed on other attributes, and written with
//! optimistic concurrency.
//!
//! ## Architecture Modules
//! - **`document`**: The storage seam. Filters, sorts, update documents, the async driver
//!   traits and an in-memory store used by the demo and the tests.
//! - **`node`**: Cluster topology. Database nodes, the control-plane tracker that records
//!   which nodes hold each collection, and the shard router.
//! - **`schema`**: Attribute types, coercion, defaults and index declarations.
//! - **`tracking`**: Dirty tracking for nested lists and maps, folded into minimal updates.
//! - **`model`**: Registered models, instances, hooks and secondary shards.
//! - **`query`**: Planning, fan-out, lazy heap merge and rehydration of secondary results.
//! - **`commit`**: Inserts, versioned updates with retry, shard migration, transactions and
//!   secondary-copy propagation.
//! - **`lock`**: Named leases stored on documents.

pub mod commit;
pub mod config;
pub mod document;
pub mod error;
pub mod lock;
pub mod model;
pub mod node;
pub mod query;
pub mod schema;
pub mod tracking;

pub use config::Settings;
pub use error::{OdmError, Result};
