//! Document Store Contract
//!
//! The vocabulary and driver traits the mapper is built on, plus an in-process backend.
//!
//! ## Core Concepts
//! - **Documents**: JSON objects (`serde_json::Map`) addressed by dotted paths.
//! - **Filters / Sorts / Updates**: a small, store-agnostic query and update language.
//! - **Driver**: `DocumentStore` -> `Collection` + `Session`, the only surface the engines use.
//! - **Memory backend**: `MemoryStore` implements the driver with unique indexes and
//!   undo-journal transactions, so whole clusters can run in one process.

pub mod driver;
pub mod filter;
pub mod memory;
pub mod types;
pub mod value;

pub use driver::{Collection, DocStream, DocumentStore, DriverError, Session};
pub use types::{
    Document, Filter, FindOptions, ID_FIELD, IndexSpec, LOCKS_FIELD, Pattern, Sort, SortKey, UpdateDoc,
    UpdateOp, VERSION_FIELD,
};
