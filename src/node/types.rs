use crate::document::driver::{DocumentStore, DriverError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Connection settings and shard-space position of one physical node, as recorded in the
/// control-plane tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub hosts: Vec<String>,
    #[serde(default)]
    pub replicaset: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub db_name: String,
    /// Upper boundary of the node's shard-key range.
    #[serde(default)]
    pub pos: Value,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, db_name: impl Into<String>, pos: impl Into<Value>) -> Self {
        Self {
            hosts: vec![host.into()],
            replicaset: None,
            username: None,
            password: None,
            db_name: db_name.into(),
            pos: pos.into(),
        }
    }

    /// Physical address: hosts plus replica set. Two configs with the same address reach the
    /// same store even if their `db_name` differs.
    pub fn address(&self) -> String {
        match &self.replicaset {
            Some(replicaset) => format!("{}?replicaSet={}", self.hosts.join(","), replicaset),
            None => self.hosts.join(","),
        }
    }
}

/// Opens a [`DocumentStore`] for a node config. Connection pooling belongs to the
/// implementation.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &NodeConfig) -> Result<Arc<dyn DocumentStore>, DriverError>;
}
