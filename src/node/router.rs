use super::database_node::DatabaseNode;
use crate::document::driver::Collection;
use crate::document::types::{Document, Filter, Sort};
use crate::document::value::{compare_values, get_path, root_field};
use crate::error::{OdmError, Result};

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Maps shard-key values to nodes by sorted range partitioning.
///
/// Nodes are ordered by `pos`. A key belongs to the first node whose `pos` is >= the key;
/// keys beyond the last boundary wrap around to the first node. Adding a node does not move
/// existing documents.
pub struct ShardRouter {
    collection: String,
    shard_key: Option<String>,
    nodes: Vec<Arc<DatabaseNode>>,
    /// Set for secondary shards: only these attributes may be filtered or sorted on.
    projected: Option<BTreeSet<String>>,
}

impl ShardRouter {
    pub fn new(
        collection: impl Into<String>,
        shard_key: Option<String>,
        mut nodes: Vec<Arc<DatabaseNode>>,
        projected: Option<BTreeSet<String>>,
    ) -> Result<Self> {
        let collection = collection.into();
        if nodes.is_empty() {
            return Err(OdmError::validation(format!(
                "no database nodes resolved for {}",
                collection
            )));
        }
        nodes.sort_by(|a, b| compare_values(a.pos(), b.pos()));
        Ok(Self {
            collection,
            shard_key,
            nodes,
            projected,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn shard_key(&self) -> Option<&str> {
        self.shard_key.as_deref()
    }

    pub fn nodes(&self) -> &[Arc<DatabaseNode>] {
        &self.nodes
    }

    pub fn get_db_node(&self, key: &Value) -> &Arc<DatabaseNode> {
        if self.shard_key.is_none() || self.nodes.len() == 1 {
            return &self.nodes[0];
        }
        let idx = self
            .nodes
            .partition_point(|node| compare_values(node.pos(), key) == Ordering::Less);
        if idx == self.nodes.len() {
            &self.nodes[0]
        } else {
            &self.nodes[idx]
        }
    }

    /// Node owning `doc` according to its current shard-key value (null when absent).
    pub fn node_for_doc(&self, doc: &Document) -> &Arc<DatabaseNode> {
        let key = self
            .shard_key
            .as_deref()
            .and_then(|field| get_path(doc, field))
            .unwrap_or(&Value::Null);
        self.get_db_node(key)
    }

    pub fn collection_on(&self, node: &DatabaseNode) -> Arc<dyn Collection> {
        node.collection(&self.collection)
    }

    /// Whether every filter field and sort key is available on this router's documents.
    pub fn covers(&self, filter: &Filter, sort: Option<&Sort>) -> bool {
        let Some(projected) = &self.projected else {
            return true;
        };
        let sort_fields = sort
            .into_iter()
            .flat_map(|sort| sort.fields().map(|field| root_field(field).to_string()));
        filter
            .fields()
            .into_iter()
            .chain(sort_fields)
            .all(|field| projected.contains(&field))
    }

    /// Nodes a query must visit, or `None` when the predicate does not pin the shard key.
    pub fn get_nodes_to_query(&self, filter: &Filter, sort: Option<&Sort>) -> Option<Vec<Arc<DatabaseNode>>> {
        if !self.covers(filter, sort) {
            return None;
        }
        let Some(shard_key) = self.shard_key.as_deref() else {
            return Some(self.nodes.clone());
        };
        let values = filter.pinned_values(shard_key)?;

        let mut seen = BTreeSet::new();
        let mut targets = Vec::new();
        for value in &values {
            let node = self.get_db_node(value);
            if seen.insert(node.name()) {
                targets.push(node.clone());
            }
        }
        tracing::debug!(
            "Routed {} on {} to {} node(s)",
            self.collection,
            shard_key,
            targets.len()
        );
        Some(targets)
    }

    pub fn get_collections_to_query(&self, filter: &Filter, sort: Option<&Sort>) -> Option<Vec<Arc<dyn Collection>>> {
        self.get_nodes_to_query(filter, sort).map(|nodes| {
            nodes
                .iter()
                .map(|node| self.collection_on(node))
                .collect()
        })
    }
}
