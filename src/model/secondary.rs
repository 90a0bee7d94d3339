use super::model::Model;
use crate::commit::TxnScope;
use crate::commit::transaction::session_in;
use crate::document::types::{Document, Filter, Sort, VERSION_FIELD};
use crate::document::value::get_path;
use crate::error::{OdmError, Result};

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Projection of a model replicated under an alternate shard key.
///
/// Backed by its own internal [`Model`] sharing the primary's collection name and identity.
/// Each copy holds the key, the identity, the projected attributes and the version.
pub struct SecondaryShard {
    key: String,
    model: Arc<Model>,
}

impl SecondaryShard {
    pub(crate) fn new(key: String, model: Arc<Model>) -> Self {
        Self { key, model }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn attributes(&self) -> BTreeSet<String> {
        self.model.schema().attr_names()
    }

    pub fn covers(&self, filter: &Filter, sort: Option<&Sort>) -> bool {
        self.model.router().covers(filter, sort)
    }

    /// Secondary copy of a primary document, or `None` when the key is unset.
    pub fn project(&self, doc: &Document) -> Option<Document> {
        match get_path(doc, &self.key) {
            None | Some(Value::Null) => return None,
            Some(_) => {}
        }
        let mut projected = Document::new();
        for attr in self.model.schema().attrs.keys() {
            if let Some(value) = doc.get(attr) {
                projected.insert(attr.clone(), value.clone());
            }
        }
        if let Some(version) = doc.get(VERSION_FIELD) {
            projected.insert(VERSION_FIELD.to_string(), version.clone());
        }
        Some(projected)
    }

    /// Whether any projected attribute differs between two primary states.
    pub fn projection_changed(&self, before: Option<&Document>, after: Option<&Document>) -> bool {
        self.model.schema().attrs.keys().any(|attr| {
            let old = before.and_then(|doc| doc.get(attr));
            let new = after.and_then(|doc| doc.get(attr));
            match (old, new) {
                (Some(a), Some(b)) => a != b,
                (None, None) => false,
                _ => true,
            }
        })
    }

    fn identity_of(&self, copy: &Document) -> Result<Document> {
        self.model.identity_of(copy).ok_or_else(|| {
            OdmError::validation(format!(
                "{} copy is missing identity attributes {:?}",
                self.model.name(),
                self.model.schema().pk_attrs
            ))
        })
    }

    /// Brings the secondary copy in line with a primary transition `before` -> `after`.
    /// Writes the new copy where its key now lives and removes the stale one when the copy
    /// moved node or changed identity.
    pub async fn propagate(
        &self,
        before: Option<&Document>,
        after: Option<&Document>,
        scope: Option<&TxnScope>,
    ) -> Result<()> {
        let router = self.model.router();
        let old = before.and_then(|doc| self.project(doc));
        let new = after.and_then(|doc| self.project(doc));

        let mut new_home = None;
        if let Some(copy) = new {
            let node = router.node_for_doc(&copy);
            let identity = self.identity_of(&copy)?;
            let session = session_in(scope, node).await?;
            router
                .collection_on(node)
                .replace_one(&self.model.identity_filter(&identity), copy, true, session.as_deref())
                .await?;
            new_home = Some((node.name(), identity));
        }

        if let Some(stale) = old {
            let node = router.node_for_doc(&stale);
            let identity = self.identity_of(&stale)?;
            let moved = match &new_home {
                Some((name, new_identity)) => *name != node.name() || *new_identity != identity,
                None => true,
            };
            if moved {
                let session = session_in(scope, node).await?;
                let key = get_path(&stale, &self.key).cloned().unwrap_or(Value::Null);
                let filter = Filter::and([
                    Filter::Eq(self.key.clone(), key),
                    self.model.identity_filter(&identity),
                ]);
                router
                    .collection_on(node)
                    .delete_one(&filter, session.as_deref())
                    .await?;
            }
        }
        Ok(())
    }
}
