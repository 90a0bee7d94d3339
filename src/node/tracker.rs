use super::database_node::DatabaseNode;
use super::types::{Connector, NodeConfig};
use crate::document::driver::{Collection, DocumentStore};
use crate::document::types::{Document, Filter, ID_FIELD, now_ms};
use crate::error::{OdmError, Result};
use crate::schema::ModelSchema;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const TRACKER_COLLECTION: &str = "collection_tracker";

/// Persisted topology of one collection (or of one secondary shard of it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionTracker {
    #[serde(rename = "_id")]
    pub id: String,
    pub db_nodes: Vec<NodeConfig>,
    pub is_primary_shard: bool,
    /// Shard key of the record's own model: the primary key for primary records, the
    /// alternate key for secondary ones.
    #[serde(default)]
    pub primary_shard_key: Option<String>,
    #[serde(default)]
    pub secondary_shard_keys: Vec<String>,
    #[serde(default)]
    pub pk_attrs: Vec<String>,
    #[serde(default)]
    pub attrs: Vec<String>,
    #[serde(default)]
    pub created_at: u64,
}

impl CollectionTracker {
    /// `<db>__<collection>`, or `<db>__<collection>__<key>` for a secondary shard.
    pub fn record_id(db_name: &str, collection: &str, secondary_key: Option<&str>) -> String {
        match secondary_key {
            Some(key) => format!("{}__{}__{}", db_name, collection, key),
            None => format!("{}__{}", db_name, collection),
        }
    }

    fn for_schema(schema: &ModelSchema, db_nodes: Vec<NodeConfig>) -> Self {
        let secondary_key = schema
            .is_secondary_shard
            .then_some(schema.shard_key.as_deref())
            .flatten();
        Self {
            id: Self::record_id(&schema.db_name, &schema.collection, secondary_key),
            db_nodes,
            is_primary_shard: !schema.is_secondary_shard,
            primary_shard_key: schema.shard_key.clone(),
            secondary_shard_keys: schema.secondary_shard_keys.clone(),
            pk_attrs: schema.pk_attrs.clone(),
            attrs: schema.attrs.keys().cloned().collect(),
            created_at: now_ms(),
        }
    }

    fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(OdmError::validation("tracker record is not an object")),
        }
    }

    fn from_document(doc: Document) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}

/// Reads and writes topology records, and owns the process-wide node handles.
///
/// Records are read once per model at registration. A missing record means a single default
/// node; the assumption is written back so every process agrees on it.
pub struct ControlPlane {
    records: Arc<dyn Collection>,
    connector: Arc<dyn Connector>,
    default_node: NodeConfig,
    /// Address -> connection, shared by every node entry on that address.
    stores: DashMap<String, Arc<dyn DocumentStore>>,
    /// `<address>/<db_name>@<pos>` -> node. Each record places its nodes with its own `pos`.
    nodes: DashMap<String, Arc<DatabaseNode>>,
}

impl ControlPlane {
    /// Control records live on the `control` node; it is also the default data node.
    pub fn new(connector: Arc<dyn Connector>, control: NodeConfig) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = connector.connect(&control)?;
        let records = store.collection(&control.db_name, TRACKER_COLLECTION);
        tracing::info!("Control plane on {} ({})", control.address(), control.db_name);
        Ok(Self {
            records,
            connector,
            default_node: control,
            stores: DashMap::new(),
            nodes: DashMap::new(),
        })
    }

    pub fn with_default_node(mut self, default_node: NodeConfig) -> Self {
        self.default_node = default_node;
        self
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub async fn load(&self, record_id: &str) -> Result<Option<CollectionTracker>> {
        let filter = Filter::eq(ID_FIELD, record_id);
        match self.records.find_one(&filter, None).await? {
            Some(doc) => Ok(Some(CollectionTracker::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Declares the node set for a collection (or one of its secondary shards) ahead of
    /// registration. Shard-key metadata is filled in when the model registers.
    pub async fn set_topology(
        &self,
        db_name: &str,
        collection: &str,
        secondary_key: Option<&str>,
        db_nodes: Vec<NodeConfig>,
    ) -> Result<()> {
        if db_nodes.is_empty() {
            return Err(OdmError::validation("a topology needs at least one node"));
        }
        let id = CollectionTracker::record_id(db_name, collection, secondary_key);
        let record = CollectionTracker {
            id: id.clone(),
            db_nodes,
            is_primary_shard: secondary_key.is_none(),
            primary_shard_key: secondary_key.map(str::to_string),
            secondary_shard_keys: Vec::new(),
            pk_attrs: Vec::new(),
            attrs: Vec::new(),
            created_at: now_ms(),
        };
        self.records
            .replace_one(&Filter::eq(ID_FIELD, id.as_str()), record.to_document()?, true, None)
            .await?;
        tracing::info!("Topology for {} set to {} node(s)", id, record.db_nodes.len());
        Ok(())
    }

    /// Node set for `schema`, creating the default record when none exists.
    pub async fn resolve(&self, schema: &ModelSchema) -> Result<Vec<Arc<DatabaseNode>>> {
        let expected = CollectionTracker::for_schema(schema, Vec::new());
        let record = match self.load(&expected.id).await? {
            Some(record) => {
                self.reconcile(&record, &expected).await?;
                record
            }
            None => self.create_default(schema, expected).await?,
        };
        record
            .db_nodes
            .iter()
            .map(|config| self.node_for(config))
            .collect()
    }

    async fn create_default(&self, schema: &ModelSchema, mut record: CollectionTracker) -> Result<CollectionTracker> {
        let mut node = self.default_node.clone();
        node.db_name = match (schema.is_secondary_shard, schema.shard_key.as_deref()) {
            (true, Some(key)) => format!("{}__{}", schema.db_name, key),
            _ => schema.db_name.clone(),
        };
        node.pos = Value::Null;
        record.db_nodes = vec![node];

        match self.records.insert_one(record.to_document()?, None).await {
            Ok(()) => {
                tracing::info!("No topology for {}; assuming a single default node", record.id);
                Ok(record)
            }
            // Another process registered first; use its record.
            Err(e) if e.is_duplicate_key() => match self.load(&record.id).await? {
                Some(existing) => Ok(existing),
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Fills metadata on operator-declared records and reports drift on established ones.
    async fn reconcile(&self, record: &CollectionTracker, expected: &CollectionTracker) -> Result<()> {
        if record.pk_attrs.is_empty() {
            let mut filled = expected.clone();
            filled.db_nodes = record.db_nodes.clone();
            filled.created_at = record.created_at;
            self.records
                .replace_one(&Filter::eq(ID_FIELD, record.id.as_str()), filled.to_document()?, false, None)
                .await?;
            return Ok(());
        }
        if record.primary_shard_key != expected.primary_shard_key {
            tracing::warn!(
                "Topology drift on {}: shard key {:?} recorded, {:?} declared",
                record.id,
                record.primary_shard_key,
                expected.primary_shard_key
            );
        }
        if record.pk_attrs != expected.pk_attrs {
            tracing::warn!(
                "Topology drift on {}: identity {:?} recorded, {:?} declared",
                record.id,
                record.pk_attrs,
                expected.pk_attrs
            );
        }
        if record.secondary_shard_keys != expected.secondary_shard_keys {
            tracing::warn!(
                "Topology drift on {}: secondary keys {:?} recorded, {:?} declared",
                record.id,
                record.secondary_shard_keys,
                expected.secondary_shard_keys
            );
        }
        Ok(())
    }

    fn store_for(&self, config: &NodeConfig) -> Result<Arc<dyn DocumentStore>> {
        let address = config.address();
        if let Some(store) = self.stores.get(&address) {
            return Ok(store.value().clone());
        }
        let store = self.connector.connect(config)?;
        Ok(self.stores.entry(address).or_insert(store).value().clone())
    }

    fn node_for(&self, config: &NodeConfig) -> Result<Arc<DatabaseNode>> {
        let key = format!("{}/{}@{}", config.address(), config.db_name, config.pos);
        if let Some(node) = self.nodes.get(&key) {
            return Ok(node.value().clone());
        }
        let store = self.store_for(config)?;
        let node = self
            .nodes
            .entry(key)
            .or_insert_with(|| DatabaseNode::new(config.clone(), store))
            .value()
            .clone();
        Ok(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Distinct physical connections opened so far.
    pub fn store_count(&self) -> usize {
        self.stores.len()
    }
}
