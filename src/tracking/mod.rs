//! Dirty Tracking
//!
//! Turns local mutations of an instance into the smallest update the store needs to apply.
//!
//! ## Core Concepts
//! - **ContainerOp**: a tagged log entry for one in-place list or map mutation
//!   (append, insert, remove, remove-at, pop, clear, set-key, unset-key).
//! - **PendingUpdates**: deferred defaults, whole-value assignments and container ops,
//!   kept disjoint by path so they can be emitted as a single ordered update.
//! - **ListMut / MapMut**: builders that apply a mutation locally and record it through the
//!   [`Tracked`] trait.

pub mod containers;
pub mod ops;
pub mod pending;

pub use containers::{ListMut, MapMut, Tracked};
pub use ops::ContainerOp;
pub use pending::PendingUpdates;
