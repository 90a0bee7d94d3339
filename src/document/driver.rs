//! Document-store driver contract.
//!
//! The mapper never speaks a wire protocol. Each physical node is reached through a
//! [`DocumentStore`] which hands out [`Collection`] handles and [`Session`]s. Anything that
//! implements these traits (a real client wrapper, or [`super::memory::MemoryStore`]) can back
//! a [`crate::node::DatabaseNode`].

use super::types::{Document, Filter, FindOptions, IndexSpec, UpdateDoc};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("duplicate key on index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    /// The driver labels this error as safe to retry the whole transaction.
    #[error("transient transaction error: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DriverError::DuplicateKey { .. })
    }
}

/// Lazy, ordered sequence of raw documents.
pub type DocStream = BoxStream<'static, Result<Document, DriverError>>;

/// A driver session. Writes issued with a session inside an active transaction become
/// visible atomically on commit, or are rolled back on abort.
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    async fn start_transaction(&self) -> Result<(), DriverError>;

    async fn commit_transaction(&self) -> Result<(), DriverError>;

    async fn abort_transaction(&self) -> Result<(), DriverError>;
}

#[async_trait]
pub trait Collection: Send + Sync {
    /// `<db>.<collection>`
    fn namespace(&self) -> &str;

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
        session: Option<&dyn Session>,
    ) -> Result<DocStream, DriverError>;

    async fn find_one(
        &self,
        filter: &Filter,
        session: Option<&dyn Session>,
    ) -> Result<Option<Document>, DriverError> {
        let options = FindOptions {
            limit: Some(1),
            ..FindOptions::default()
        };
        let mut stream = self.find(filter, &options, session).await?;
        stream.next().await.transpose()
    }

    /// Atomically applies `update` to the first match and returns the post-image.
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &UpdateDoc,
        session: Option<&dyn Session>,
    ) -> Result<Option<Document>, DriverError>;

    async fn insert_one(&self, doc: Document, session: Option<&dyn Session>) -> Result<(), DriverError>;

    /// Replaces the first match wholesale. With `upsert`, inserts when nothing matches.
    /// Returns whether a document was written.
    async fn replace_one(
        &self,
        filter: &Filter,
        doc: Document,
        upsert: bool,
        session: Option<&dyn Session>,
    ) -> Result<bool, DriverError>;

    async fn delete_one(&self, filter: &Filter, session: Option<&dyn Session>) -> Result<bool, DriverError>;

    async fn delete_many(&self, filter: &Filter, session: Option<&dyn Session>) -> Result<u64, DriverError>;

    async fn count_documents(&self, filter: &Filter, session: Option<&dyn Session>) -> Result<u64, DriverError>;

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, DriverError>;

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), DriverError>;
}

/// Client for one physical node.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stable identity of the physical node; sessions are scoped to it.
    fn id(&self) -> &str;

    fn collection(&self, db: &str, name: &str) -> Arc<dyn Collection>;

    async fn start_session(&self) -> Result<Arc<dyn Session>, DriverError>;
}
