use super::hooks::HookRegistry;
use super::instance::Instance;
use super::secondary::SecondaryShard;
use crate::config::Settings;
use crate::document::driver::Collection;
use crate::document::types::{Document, Filter};
use crate::document::value::get_path;
use crate::error::{OdmError, Result};
use crate::node::ShardRouter;
use crate::query::{QueryCursor, QueryRequest};
use crate::schema::ModelSchema;

use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A registered model: schema, placement, secondary shards and per-model runtime state.
pub struct Model {
    schema: ModelSchema,
    router: ShardRouter,
    secondary_shards: Vec<SecondaryShard>,
    hooks: Arc<HookRegistry>,
    settings: Arc<Settings>,
    /// Identity key -> last stored document. Best effort.
    identity_cache: DashMap<String, Document>,
    /// `<instance local id>/<lock name>` -> token, for locks on unpersisted instances.
    pub(crate) local_locks: DashMap<String, String>,
}

impl Model {
    pub(crate) fn new(
        schema: ModelSchema,
        router: ShardRouter,
        secondary_shards: Vec<SecondaryShard>,
        hooks: Arc<HookRegistry>,
        settings: Arc<Settings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            schema,
            router,
            secondary_shards,
            hooks,
            settings,
            identity_cache: DashMap::new(),
            local_locks: DashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn secondary_shards(&self) -> &[SecondaryShard] {
        &self.secondary_shards
    }

    pub fn secondary_shard(&self, key: &str) -> Option<&SecondaryShard> {
        self.secondary_shards.iter().find(|shard| shard.key() == key)
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn new_instance(self: &Arc<Self>) -> Instance {
        Instance::new(self.clone())
    }

    pub fn instance_from_doc(self: &Arc<Self>, doc: Document) -> Instance {
        Instance::from_doc(self.clone(), doc)
    }

    /// Identity values of `doc`, or `None` if any is missing or null.
    pub fn identity_of(&self, doc: &Document) -> Option<Document> {
        let mut identity = Document::new();
        for attr in &self.schema.pk_attrs {
            match get_path(doc, attr) {
                None | Some(Value::Null) => return None,
                Some(value) => {
                    identity.insert(attr.clone(), value.clone());
                }
            }
        }
        Some(identity)
    }

    pub fn identity_filter(&self, identity: &Document) -> Filter {
        Filter::from_document(identity)
    }

    /// Stable string form of an identity, used as a cache and dedup key.
    pub fn identity_key(identity: &Document) -> String {
        Value::Object(identity.clone()).to_string()
    }

    /// Primary collection that owns `doc` (or an identity, which carries the shard key).
    pub fn collection_for(&self, doc: &Document) -> Arc<dyn Collection> {
        self.router.collection_on(self.router.node_for_doc(doc))
    }

    pub(crate) fn cache_put(&self, doc: &Document) {
        if !self.settings.identity_cache {
            return;
        }
        if let Some(identity) = self.identity_of(doc) {
            self.identity_cache
                .insert(Self::identity_key(&identity), doc.clone());
        }
    }

    pub(crate) fn cache_evict(&self, identity: &Document) {
        self.identity_cache.remove(&Self::identity_key(identity));
    }

    pub(crate) fn clear_cache(&self) {
        self.identity_cache.clear();
    }

    async fn fetch(&self, identity: &Document) -> Result<Option<Document>> {
        let collection = self.collection_for(identity);
        Ok(collection
            .find_one(&self.identity_filter(identity), None)
            .await?)
    }

    /// Looks a document up by identity, through the identity cache when enabled.
    pub async fn get_by_id(self: &Arc<Self>, identity: Document) -> Result<Option<Instance>> {
        let key = Self::identity_key(&identity);
        if self.settings.identity_cache
            && let Some(doc) = self.identity_cache.get(&key)
        {
            return Ok(Some(self.instance_from_doc(doc.value().clone())));
        }
        let Some(doc) = self.fetch(&identity).await? else {
            return Ok(None);
        };
        self.cache_put(&doc);
        Ok(Some(self.instance_from_doc(doc)))
    }

    /// Replaces the instance state with the stored document, dropping pending changes.
    pub async fn reload(&self, instance: &mut Instance) -> Result<()> {
        let identity = match instance.persisted_identity() {
            Some(identity) => identity,
            None => instance.identity()?,
        };
        let Some(doc) = self.fetch(&identity).await? else {
            return Err(OdmError::DocumentMissing {
                model: self.name().to_string(),
                identity: Self::identity_key(&identity),
            });
        };
        self.cache_put(&doc);
        instance.mark_persisted(doc);
        Ok(())
    }

    pub async fn query(self: &Arc<Self>, request: QueryRequest) -> Result<QueryCursor> {
        crate::query::engine::execute(self.clone(), request)
    }

    /// All matches of `filter`, in store order.
    pub async fn find(self: &Arc<Self>, filter: Filter) -> Result<Vec<Instance>> {
        self.query(QueryRequest::new(filter)).await?.try_collect().await
    }

    /// First match of `filter`.
    pub async fn get(self: &Arc<Self>, filter: Filter) -> Result<Option<Instance>> {
        self.query(QueryRequest::new(filter).limit(1)).await?.next().await
    }

    /// Counts matches on the primary shards the filter routes to (every node when unpinned).
    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        let collections = self
            .router
            .get_collections_to_query(filter, None)
            .unwrap_or_else(|| {
                self.router
                    .nodes()
                    .iter()
                    .map(|node| self.router.collection_on(node))
                    .collect()
            });
        let mut total = 0;
        for collection in collections {
            total += collection.count_documents(filter, None).await?;
        }
        Ok(total)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.schema.name)
            .field("collection", &self.schema.collection)
            .field("shard_key", &self.schema.shard_key)
            .field("nodes", &self.router.nodes().len())
            .field("secondary_shards", &self.secondary_shards.len())
            .finish()
    }
}
