use super::attribute::{AttrType, Attribute};
use super::index::Index;
use crate::document::types::{ID_FIELD, IndexSpec, LOCKS_FIELD, VERSION_FIELD};
use crate::error::{OdmError, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Immutable description of a model, produced once by [`ModelSchemaBuilder::build`].
#[derive(Debug, Clone)]
pub struct ModelSchema {
    /// Registry key. Secondary shards are named `<model>__<key>`.
    pub name: String,
    pub db_name: String,
    pub collection: String,
    pub attrs: BTreeMap<String, Arc<Attribute>>,
    pub indexes: Vec<Index>,
    pub shard_key: Option<String>,
    pub secondary_shard_keys: Vec<String>,
    /// Identity of a document; shared by the primary and every secondary shard.
    pub pk_attrs: Vec<String>,
    pub is_secondary_shard: bool,
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        let name = name.into();
        ModelSchemaBuilder {
            collection: name.clone(),
            name,
            db_name: "default".to_string(),
            attrs: Vec::new(),
            indexes: Vec::new(),
            shard_key: None,
            secondary_shard_keys: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Arc<Attribute>> {
        self.attrs.get(name)
    }

    pub fn attr_names(&self) -> BTreeSet<String> {
        self.attrs.keys().cloned().collect()
    }

    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes.iter().map(Index::spec).collect()
    }

    /// Schema of the secondary shard keyed on `key`.
    ///
    /// The projection is the key, the identity, and the keys and projections of every index
    /// leading with `key`. Attribute descriptors are shared with this schema.
    pub fn derive_secondary(&self, key: &str) -> Result<ModelSchema> {
        if !self.secondary_shard_keys.iter().any(|k| k == key) {
            return Err(OdmError::validation(format!(
                "{} declares no secondary shard on '{}'",
                self.name, key
            )));
        }
        let mut names: BTreeSet<String> = BTreeSet::new();
        names.insert(key.to_string());
        names.extend(self.pk_attrs.iter().cloned());

        let mut indexes = Vec::new();
        let mut identity_index = vec![key.to_string()];
        identity_index.extend(self.pk_attrs.iter().filter(|a| a.as_str() != key).cloned());
        indexes.push(Index::new(identity_index).unique());

        for index in self
            .indexes
            .iter()
            .filter(|index| index.leading_key() == Some(key))
        {
            names.extend(index.keys.iter().cloned());
            names.extend(index.projection.iter().cloned());
            let carried = Index {
                keys: index.keys.clone(),
                unique: index.unique,
                projection: Vec::new(),
            };
            if !indexes.iter().any(|existing: &Index| existing.keys == carried.keys) {
                indexes.push(carried);
            }
        }

        let name = format!("{}__{}", self.name, key);
        let mut attrs = BTreeMap::new();
        for attr_name in names {
            let Some(attr) = self.attrs.get(&attr_name) else {
                return Err(OdmError::validation(format!(
                    "secondary shard {} projects undeclared attribute '{}'",
                    name, attr_name
                )));
            };
            attr.attach(&name);
            attrs.insert(attr_name, attr.clone());
        }

        Ok(ModelSchema {
            name,
            db_name: self.db_name.clone(),
            collection: self.collection.clone(),
            attrs,
            indexes,
            shard_key: Some(key.to_string()),
            secondary_shard_keys: Vec::new(),
            pk_attrs: self.pk_attrs.clone(),
            is_secondary_shard: true,
        })
    }
}

pub struct ModelSchemaBuilder {
    name: String,
    db_name: String,
    collection: String,
    attrs: Vec<Arc<Attribute>>,
    indexes: Vec<Index>,
    shard_key: Option<String>,
    secondary_shard_keys: Vec<String>,
}

impl ModelSchemaBuilder {
    pub fn db(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = db_name.into();
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn attr(mut self, attr: Attribute) -> Self {
        self.attrs.push(Arc::new(attr));
        self
    }

    /// Declares an attribute descriptor that other models may also use.
    pub fn shared_attr(mut self, attr: Arc<Attribute>) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn shard_key(mut self, key: impl Into<String>) -> Self {
        self.shard_key = Some(key.into());
        self
    }

    pub fn secondary_shard_key(mut self, key: impl Into<String>) -> Self {
        self.secondary_shard_keys.push(key.into());
        self
    }

    pub fn build(self) -> Result<ModelSchema> {
        let mut attrs: BTreeMap<String, Arc<Attribute>> = BTreeMap::new();
        for attr in self.attrs {
            let name = attr.name().to_string();
            if name == VERSION_FIELD || name == LOCKS_FIELD {
                return Err(OdmError::validation(format!(
                    "'{}' is reserved and cannot be declared on {}",
                    name, self.name
                )));
            }
            if attrs.insert(name.clone(), attr).is_some() {
                return Err(OdmError::validation(format!(
                    "attribute '{}' declared twice on {}",
                    name, self.name
                )));
            }
        }

        let declared = |key: &str| key == ID_FIELD || attrs.contains_key(key);

        if let Some(key) = &self.shard_key
            && !attrs.contains_key(key)
        {
            return Err(OdmError::validation(format!(
                "shard key '{}' is not an attribute of {}",
                key, self.name
            )));
        }
        let mut seen = BTreeSet::new();
        for key in &self.secondary_shard_keys {
            if !attrs.contains_key(key) {
                return Err(OdmError::validation(format!(
                    "secondary shard key '{}' is not an attribute of {}",
                    key, self.name
                )));
            }
            if Some(key) == self.shard_key.as_ref() || !seen.insert(key.clone()) {
                return Err(OdmError::validation(format!(
                    "secondary shard key '{}' is repeated on {}",
                    key, self.name
                )));
            }
        }
        for index in &self.indexes {
            if index.keys.is_empty() {
                return Err(OdmError::validation(format!("empty index on {}", self.name)));
            }
            if let Some(bad) = index
                .keys
                .iter()
                .chain(index.projection.iter())
                .find(|key| !declared(key))
            {
                return Err(OdmError::validation(format!(
                    "index {:?} on {} references undeclared attribute '{}'",
                    index.keys, self.name, bad
                )));
            }
        }

        let pk_attrs = derive_pk(&self.name, self.shard_key.as_deref(), &self.indexes)?;
        if pk_attrs.iter().any(|a| a == ID_FIELD) && !attrs.contains_key(ID_FIELD) {
            let id = Attribute::new(ID_FIELD, AttrType::Str)
                .with_default_fn(|| serde_json::Value::String(Uuid::new_v4().to_string()));
            attrs.insert(ID_FIELD.to_string(), Arc::new(id));
        }
        for attr in attrs.values() {
            attr.attach(&self.name);
        }

        tracing::debug!("Built schema {} with identity {:?}", self.name, pk_attrs);
        Ok(ModelSchema {
            name: self.name,
            db_name: self.db_name,
            collection: self.collection,
            attrs,
            indexes: self.indexes,
            shard_key: self.shard_key,
            secondary_shard_keys: self.secondary_shard_keys,
            pk_attrs,
            is_secondary_shard: false,
        })
    }
}

/// Shortest unique index leading with the shard key. Unsharded models take their shortest
/// unique index, or fall back to the store-assigned id.
fn derive_pk(model: &str, shard_key: Option<&str>, indexes: &[Index]) -> Result<Vec<String>> {
    let candidate = indexes
        .iter()
        .filter(|index| index.unique)
        .filter(|index| shard_key.is_none() || index.leading_key() == shard_key)
        .min_by_key(|index| index.keys.len());
    match (candidate, shard_key) {
        (Some(index), _) => Ok(index.keys.clone()),
        (None, None) => Ok(vec![ID_FIELD.to_string()]),
        (None, Some(key)) => Err(OdmError::validation(format!(
            "{} needs a unique index leading with its shard key '{}'",
            model, key
        ))),
    }
}
