use super::hooks::HookRegistry;
use super::model::Model;
use super::secondary::SecondaryShard;
use crate::config::Settings;
use crate::document::types::IndexSpec;
use crate::error::{OdmError, Result};
use crate::node::{ControlPlane, ShardRouter};
use crate::schema::ModelSchema;

use dashmap::DashMap;
use std::sync::Arc;

/// Explicit home of every registered model.
///
/// Registration resolves topology from the control plane, derives secondary shards and
/// reconciles indexes. `teardown` drops all models and their caches.
pub struct ModelRegistry {
    control: ControlPlane,
    settings: Arc<Settings>,
    models: DashMap<String, Arc<Model>>,
}

impl ModelRegistry {
    pub fn new(control: ControlPlane, settings: Settings) -> Self {
        Self {
            control,
            settings: Arc::new(settings),
            models: DashMap::new(),
        }
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub async fn register(&self, schema: ModelSchema) -> Result<Arc<Model>> {
        if self.models.contains_key(&schema.name) {
            return Err(OdmError::validation(format!(
                "model {} is already registered",
                schema.name
            )));
        }

        let mut shards = Vec::with_capacity(schema.secondary_shard_keys.len());
        for key in &schema.secondary_shard_keys {
            let shard_schema = schema.derive_secondary(key)?;
            let shard_model = self.build(shard_schema, Vec::new()).await?;
            shards.push(SecondaryShard::new(key.clone(), shard_model));
        }

        let name = schema.name.clone();
        let model = self.build(schema, shards).await?;
        self.models.insert(name.clone(), model.clone());
        tracing::info!(
            "Registered model {} on {} node(s) with {} secondary shard(s)",
            name,
            model.router().nodes().len(),
            model.secondary_shards().len()
        );
        Ok(model)
    }

    async fn build(&self, schema: ModelSchema, shards: Vec<SecondaryShard>) -> Result<Arc<Model>> {
        let nodes = self.control.resolve(&schema).await?;
        let projected = schema.is_secondary_shard.then(|| schema.attr_names());
        let router = ShardRouter::new(
            schema.collection.clone(),
            schema.shard_key.clone(),
            nodes,
            projected,
        )?;
        let model = Model::new(schema, router, shards, HookRegistry::new(), self.settings.clone());
        self.sync_indexes(&model).await?;
        Ok(model)
    }

    /// Creates declared indexes that are missing (outside production) and reports indexes
    /// nobody declared. Nothing is ever dropped.
    ///
    /// Returns the stored indexes that cover declared keys with different options.
    pub async fn sync_indexes(&self, model: &Model) -> Result<Vec<IndexSpec>> {
        let declared = model.schema().index_specs();
        let mut drifted = Vec::new();
        for node in model.router().nodes() {
            let collection = model.router().collection_on(node);
            let existing = collection.list_indexes().await?;

            for spec in &declared {
                if let Some(found) = existing.iter().find(|index| index.keys == spec.keys) {
                    if found.unique != spec.unique || found.name != spec.name {
                        tracing::warn!(
                            "Index {} on {} differs from the declared {} (unique: {} stored, {} declared); leaving it in place",
                            found.name,
                            collection.namespace(),
                            spec.name,
                            found.unique,
                            spec.unique
                        );
                        drifted.push(found.clone());
                    }
                    continue;
                }
                if self.settings.production {
                    tracing::warn!(
                        "Index {} missing on {} (not created in production)",
                        spec.name,
                        collection.namespace()
                    );
                } else {
                    collection.create_index(spec).await?;
                    tracing::info!("Created index {} on {}", spec.name, collection.namespace());
                }
            }

            for index in &existing {
                if index.name == "_id_" || declared.iter().any(|spec| spec.keys == index.keys) {
                    continue;
                }
                tracing::warn!(
                    "Index {} on {} is not declared by {}; leaving it in place",
                    index.name,
                    collection.namespace(),
                    model.name()
                );
            }
        }
        Ok(drifted)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Model>> {
        self.models.get(name).map(|entry| entry.value().clone())
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn teardown(&self) {
        for entry in self.models.iter() {
            entry.value().clear_cache();
            for shard in entry.value().secondary_shards() {
                shard.model().clear_cache();
            }
        }
        self.models.clear();
        tracing::info!("Model registry torn down");
    }
}
