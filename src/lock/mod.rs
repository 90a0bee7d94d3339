//! Document Locks
//!
//! Named advisory locks stored on the document itself.
//!
//! ## Core Concepts
//! - **Claim**: a conditional update sets `_locks.<name> = {until, token}` only when the entry is
//!   absent or its lease has run out.
//! - **Spin**: failed claims back off linearly (capped) until the timeout; silent acquisitions
//!   return `None` instead of failing.
//! - **Release**: clears the entry only while the same token holds it, unless forced.
//! - **Unsaved instances**: locks live in a per-model in-process table keyed by the instance.
//!
//! Taking or releasing a lock never changes the document version.

pub mod manager;

pub use manager::{LockOptions, LockToken, acquire, force_release, release};
