//! Models & Instances
//!
//! The entity layer every runtime operation goes through.
//!
//! ## Core Concepts
//! - **ModelRegistry**: explicit registration (and teardown) of model schemas. Registration
//!   resolves node topology, builds the shard router, derives secondary shards and reconciles
//!   indexes.
//! - **Model**: an immutable schema plus its router, secondary shards, hooks and identity cache.
//! - **Instance**: one document. Setters and container builders change local values and record
//!   pending updates; commit turns those into one conditional write.
//! - **SecondaryShard**: a projected copy of each document stored under an alternate key so
//!   lookups by that key hit a single node.
//! - **Hooks**: async handlers on create/update/delete and storage updates.

pub mod field;
pub mod hooks;
pub mod instance;
pub mod model;
pub mod registry;
pub mod secondary;

pub use field::Field;
pub use hooks::{HookContext, HookEvent, HookRegistry};
pub use instance::Instance;
pub use model::Model;
pub use registry::ModelRegistry;
pub use secondary::SecondaryShard;
