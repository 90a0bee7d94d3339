use super::types::NodeConfig;
use crate::document::driver::{Collection, DocumentStore, DriverError, Session};

use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// One physical node (or one database on it) plus its place in the shard-key space.
///
/// Stores are shared process-wide and safe for concurrent use. Collection handles are opened
/// lazily and never invalidated since topology is read once at startup.
pub struct DatabaseNode {
    config: NodeConfig,
    store: Arc<dyn DocumentStore>,
    /// Collection name -> open handle.
    collections: DashMap<String, Arc<dyn Collection>>,
}

impl DatabaseNode {
    pub fn new(config: NodeConfig, store: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            collections: DashMap::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn pos(&self) -> &Value {
        &self.config.pos
    }

    pub fn db_name(&self) -> &str {
        &self.config.db_name
    }

    /// Id of the physical store; transactions are scoped to it.
    pub fn store_id(&self) -> &str {
        self.store.id()
    }

    /// Unique per (physical store, database).
    pub fn name(&self) -> String {
        format!("{}/{}", self.store.id(), self.config.db_name)
    }

    pub fn collection(&self, name: &str) -> Arc<dyn Collection> {
        if let Some(handle) = self.collections.get(name) {
            return handle.value().clone();
        }
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| self.store.collection(&self.config.db_name, name))
            .value()
            .clone()
    }

    pub async fn start_session(&self) -> Result<Arc<dyn Session>, DriverError> {
        self.store.start_session().await
    }
}

impl fmt::Debug for DatabaseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseNode")
            .field("name", &self.name())
            .field("pos", &self.config.pos)
            .finish()
    }
}
