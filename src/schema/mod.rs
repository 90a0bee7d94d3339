//! Schema Layer
//!
//! Declares what a model stores and how it is identified and distributed.
//!
//! ## Core Concepts
//! - **Attribute**: a typed field with an optional default (literal or generator) and an
//!   optional validator. Values are coerced to the declared type on assignment.
//! - **Index**: ordered keys, `unique`, and a projection that feeds secondary shards.
//! - **ModelSchema**: the immutable result of registration. Its identity (`pk_attrs`) is the
//!   shortest unique index leading with the shard key.
//! - **Secondary shards**: derived schemas keyed on an alternate attribute that carry only a
//!   projection of the primary document.

pub mod attribute;
pub mod descriptor;
pub mod index;

pub use attribute::{AttrType, Attribute, DefaultValue};
pub use descriptor::{ModelSchema, ModelSchemaBuilder};
pub use index::Index;

#[cfg(test)]
mod tests;
