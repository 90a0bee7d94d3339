use super::model::Model;
use crate::document::types::{Document, ID_FIELD, LOCKS_FIELD, UpdateDoc, VERSION_FIELD};
use crate::document::value::{apply_update, get_path, root_field, set_path};
use crate::error::{OdmError, Result};
use crate::schema::{AttrType, Attribute};
use crate::tracking::{ContainerOp, ListMut, MapMut, PendingUpdates, Tracked};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One document of a model: current values, last persisted snapshot, and buffered changes.
#[derive(Clone)]
pub struct Instance {
    model: Arc<Model>,
    values: Document,
    /// Last known stored state, `None` until persisted.
    original_doc: Option<Document>,
    is_create_new: bool,
    /// Suppresses change recording while hydrating.
    initializing: bool,
    pending: PendingUpdates,
    /// Process-local handle used for locks on unpersisted instances.
    local_id: String,
}

fn without_locks(doc: &Document) -> Document {
    let mut values = doc.clone();
    values.remove(LOCKS_FIELD);
    values
}

impl Instance {
    pub(crate) fn new(model: Arc<Model>) -> Self {
        let mut instance = Self {
            model,
            values: Document::new(),
            original_doc: None,
            is_create_new: true,
            initializing: true,
            pending: PendingUpdates::new(),
            local_id: Uuid::new_v4().to_string(),
        };
        instance.fill_defaults();
        instance.initializing = false;
        instance
    }

    pub(crate) fn from_doc(model: Arc<Model>, doc: Document) -> Self {
        let mut instance = Self {
            model,
            values: without_locks(&doc),
            original_doc: Some(doc),
            is_create_new: false,
            initializing: true,
            pending: PendingUpdates::new(),
            local_id: Uuid::new_v4().to_string(),
        };
        instance.fill_defaults();
        instance.initializing = false;
        instance
    }

    /// Missing attributes with a default get it locally and as a deferred update.
    fn fill_defaults(&mut self) {
        for (name, attr) in &self.model.schema().attrs {
            if self.values.contains_key(name) {
                continue;
            }
            if let Some(value) = attr.default_value() {
                self.values.insert(name.clone(), value.clone());
                self.pending.record_default(name, value);
            }
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn values(&self) -> &Document {
        &self.values
    }

    pub fn original_doc(&self) -> Option<&Document> {
        self.original_doc.as_ref()
    }

    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }

    pub fn is_new(&self) -> bool {
        self.is_create_new
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Version of the last persisted state.
    pub fn version(&self) -> Option<i64> {
        self.original_doc
            .as_ref()
            .and_then(|doc| doc.get(VERSION_FIELD))
            .and_then(Value::as_i64)
    }

    /// Current identity values. Fails if any identity attribute is unset.
    pub fn identity(&self) -> Result<Document> {
        self.model.identity_of(&self.values).ok_or_else(|| {
            OdmError::validation(format!(
                "{} instance is missing identity attributes {:?}",
                self.model.name(),
                self.model.schema().pk_attrs
            ))
        })
    }

    /// Identity the document is stored under.
    pub fn persisted_identity(&self) -> Option<Document> {
        self.original_doc
            .as_ref()
            .and_then(|doc| self.model.identity_of(doc))
    }

    pub fn get_value(&self, path: &str) -> Option<&Value> {
        get_path(&self.values, path)
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match get_path(&self.values, path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn set(&mut self, path: &str, value: impl Serialize) -> Result<()> {
        let attr = self.writable_attr(path)?;
        if path == ID_FIELD && !self.is_create_new {
            return Err(OdmError::validation("_id cannot change once stored"));
        }
        let value = serde_json::to_value(value)?;
        let value = if path == attr.name() {
            attr.coerce(value)?
        } else {
            value
        };
        set_path(&mut self.values, path, value)?;
        if !self.initializing {
            self.pending.record_set(path, &self.values);
        }
        Ok(())
    }

    pub fn list(&mut self, path: &str) -> Result<ListMut<'_, Self>> {
        self.writable_attr(path)?;
        ListMut::new(self, path)
    }

    pub fn map(&mut self, path: &str) -> Result<MapMut<'_, Self>> {
        self.writable_attr(path)?;
        MapMut::new(self, path)
    }

    fn writable_attr(&self, path: &str) -> Result<Arc<Attribute>> {
        let root = root_field(path);
        let Some(attr) = self.model.schema().attr(root) else {
            return Err(OdmError::validation(format!(
                "'{}' is not an attribute of {}",
                root,
                self.model.name()
            )));
        };
        if path != root && !matches!(attr.kind(), AttrType::Map | AttrType::List | AttrType::Any) {
            return Err(OdmError::validation(format!(
                "'{}' is a scalar attribute; '{}' cannot address into it",
                root, path
            )));
        }
        Ok(attr.clone())
    }

    /// Takes `current` as the stored state and replays pending changes on top of it.
    pub(crate) fn rebase(&mut self, current: Document) -> Result<()> {
        self.pending.forget_defaults_present_in(&current);
        let mut values = without_locks(&current);
        apply_update(&mut values, &self.pending.to_update(true))?;
        self.values = values;
        self.original_doc = Some(current);
        Ok(())
    }

    /// Switches a new instance onto an existing stored document with the same identity.
    pub(crate) fn adopt(&mut self, existing: Document) -> Result<()> {
        self.pending.strip(&self.model.schema().pk_attrs);
        self.rebase(existing)?;
        self.is_create_new = false;
        Ok(())
    }

    pub(crate) fn mark_persisted(&mut self, doc: Document) {
        self.values = without_locks(&doc);
        self.original_doc = Some(doc);
        self.is_create_new = false;
        self.pending.clear();
        self.initializing = true;
        self.fill_defaults();
        self.initializing = false;
    }

    /// After a delete the instance is new again; committing it re-creates the document.
    pub(crate) fn mark_deleted(&mut self) {
        self.original_doc = None;
        self.is_create_new = true;
        self.values.remove(VERSION_FIELD);
        self.pending.clear();
        let fields: Vec<String> = self.values.keys().cloned().collect();
        for field in fields {
            self.pending.record_set(&field, &self.values);
        }
    }
}

impl Tracked for Instance {
    fn tracked_value(&self, path: &str) -> Option<&Value> {
        get_path(&self.values, path)
    }

    fn apply_container_op(&mut self, path: &str, op: ContainerOp) -> Result<()> {
        apply_update(&mut self.values, &UpdateDoc::new().op(op.to_update_op(path)))?;
        if !self.initializing {
            self.pending.record_op(path, op, &self.values);
        }
        Ok(())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.name())
            .field("values", &self.values)
            .field("is_new", &self.is_create_new)
            .field("pending", &self.pending)
            .finish()
    }
}
