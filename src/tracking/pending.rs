use super::ops::ContainerOp;
use crate::document::driver::DriverError;
use crate::document::types::{Document, UpdateDoc, UpdateOp};
use crate::document::value::{apply_update, get_path, is_empty_value, root_field};

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Buffered, not yet persisted changes of one instance.
///
/// Three buckets, emitted in this order:
/// 1. `if_non_empty_set_query_update`: defaults filled in on hydration or creation. Always
///    written on insert, only when non-empty on update.
/// 2. `set_query_updates`: whole-value assignments by path.
/// 3. `other_query_updates`: container ops by path, replayed in recording order.
///
/// A path is owned by at most one bucket. A change below a path that is already being assigned
/// is folded into that assignment, and mixing ops with assignments inside one container
/// promotes the container to a whole-value assignment. This keeps replay order irrelevant
/// across paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingUpdates {
    set_query_updates: BTreeMap<String, Value>,
    if_non_empty_set_query_update: BTreeMap<String, Value>,
    other_query_updates: BTreeMap<String, Vec<ContainerOp>>,
}

/// `path` is `anchor` or lies below it.
fn is_within(path: &str, anchor: &str) -> bool {
    path == anchor || (path.starts_with(anchor) && path[anchor.len()..].starts_with('.'))
}

fn current(values: &Document, path: &str) -> Value {
    get_path(values, path).cloned().unwrap_or(Value::Null)
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set_query_updates.is_empty()
            && self.if_non_empty_set_query_update.is_empty()
            && self.other_query_updates.is_empty()
    }

    pub fn clear(&mut self) {
        self.set_query_updates.clear();
        self.if_non_empty_set_query_update.clear();
        self.other_query_updates.clear();
    }

    pub fn record_default(&mut self, path: &str, value: Value) {
        self.if_non_empty_set_query_update.insert(path.to_string(), value);
    }

    /// Records an assignment at `path`. `values` is the instance state after the assignment.
    pub fn record_set(&mut self, path: &str, values: &Document) {
        if self.fold_into_anchor(path, values) {
            return;
        }
        self.drop_below(path);
        self.set_query_updates
            .insert(path.to_string(), current(values, path));
    }

    /// Records a container mutation at `path`. `values` is the instance state after it.
    pub fn record_op(&mut self, path: &str, op: ContainerOp, values: &Document) {
        if self.fold_into_anchor(path, values) {
            return;
        }
        let nested_ops = self
            .other_query_updates
            .keys()
            .any(|p| p != path && is_within(p, path));
        let nested_sets = self
            .set_query_updates
            .keys()
            .any(|p| is_within(p, path));
        if nested_ops || nested_sets {
            self.drop_below(path);
            self.set_query_updates
                .insert(path.to_string(), current(values, path));
            return;
        }
        self.other_query_updates
            .entry(path.to_string())
            .or_default()
            .push(op);
    }

    /// Folds a change at `path` into a pending assignment of it or of an ancestor.
    fn fold_into_anchor(&mut self, path: &str, values: &Document) -> bool {
        let anchor = self
            .set_query_updates
            .keys()
            .find(|anchor| is_within(path, anchor))
            .cloned();
        if let Some(anchor) = anchor {
            let value = current(values, &anchor);
            self.set_query_updates.insert(anchor, value);
            return true;
        }

        let anchor = self
            .if_non_empty_set_query_update
            .keys()
            .find(|anchor| is_within(path, anchor))
            .cloned()
            .or_else(|| {
                self.other_query_updates
                    .keys()
                    .find(|anchor| anchor.as_str() != path && is_within(path, anchor))
                    .cloned()
            });
        if let Some(anchor) = anchor {
            self.drop_below(&anchor);
            let value = current(values, &anchor);
            self.set_query_updates.insert(anchor, value);
            return true;
        }
        false
    }

    fn drop_below(&mut self, anchor: &str) {
        self.set_query_updates.retain(|p, _| !is_within(p, anchor));
        self.if_non_empty_set_query_update
            .retain(|p, _| !is_within(p, anchor));
        self.other_query_updates.retain(|p, _| !is_within(p, anchor));
    }

    /// Update payload. `include_empty_defaults` is set for inserts.
    pub fn to_update(&self, include_empty_defaults: bool) -> UpdateDoc {
        let mut update = UpdateDoc::new();
        for (path, value) in &self.if_non_empty_set_query_update {
            if include_empty_defaults || !is_empty_value(value) {
                update = update.op(UpdateOp::Set(path.clone(), value.clone()));
            }
        }
        for (path, value) in &self.set_query_updates {
            update = update.op(UpdateOp::Set(path.clone(), value.clone()));
        }
        for (path, ops) in &self.other_query_updates {
            for op in ops {
                update = update.op(op.to_update_op(path));
            }
        }
        update
    }

    /// The document a fresh insert writes: every bucket folded into an empty document.
    pub fn to_insert_document(&self) -> Result<Document, DriverError> {
        let mut doc = Document::new();
        apply_update(&mut doc, &self.to_update(true))?;
        Ok(doc)
    }

    /// Forgets defaults for fields that `doc` now carries.
    pub fn forget_defaults_present_in(&mut self, doc: &Document) {
        self.if_non_empty_set_query_update
            .retain(|path, _| get_path(doc, path).is_none());
    }

    /// Drops pending changes to the given top-level fields.
    pub fn strip(&mut self, fields: &[String]) {
        let keep = |path: &String| !fields.iter().any(|f| f == root_field(path));
        self.set_query_updates.retain(|p, _| keep(p));
        self.if_non_empty_set_query_update.retain(|p, _| keep(p));
        self.other_query_updates.retain(|p, _| keep(p));
    }

    /// Top-level fields with pending changes.
    pub fn touched_fields(&self) -> BTreeSet<String> {
        self.set_query_updates
            .keys()
            .chain(self.if_non_empty_set_query_update.keys())
            .chain(self.other_query_updates.keys())
            .map(|path| root_field(path).to_string())
            .collect()
    }

    pub fn set_updates(&self) -> &BTreeMap<String, Value> {
        &self.set_query_updates
    }

    pub fn deferred_updates(&self) -> &BTreeMap<String, Value> {
        &self.if_non_empty_set_query_update
    }

    pub fn container_ops(&self) -> &BTreeMap<String, Vec<ContainerOp>> {
        &self.other_query_updates
    }
}
