use super::ops::ContainerOp;
use crate::error::{OdmError, Result};

use serde::Serialize;
use serde_json::{Map, Value};

/// Anything holding container values that records in-place mutations.
pub trait Tracked {
    fn tracked_value(&self, path: &str) -> Option<&Value>;

    /// Applies `op` to the local state at `path` and records it as a pending update.
    fn apply_container_op(&mut self, path: &str, op: ContainerOp) -> Result<()>;
}

/// Mutating view over a list attribute (or a list nested inside one).
pub struct ListMut<'a, T: Tracked + ?Sized> {
    target: &'a mut T,
    path: String,
}

impl<'a, T: Tracked + ?Sized> ListMut<'a, T> {
    pub fn new(target: &'a mut T, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        match target.tracked_value(&path) {
            None | Some(Value::Null) | Some(Value::Array(_)) => Ok(Self { target, path }),
            Some(other) => Err(OdmError::validation(format!(
                "'{}' holds {} and is not a list",
                path, other
            ))),
        }
    }

    fn items(&self) -> &[Value] {
        match self.target.tracked_value(&self.path) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.items().get(idx)
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.items().to_vec()
    }

    pub fn push(&mut self, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.target
            .apply_container_op(&self.path, ContainerOp::Append(value))
    }

    pub fn extend<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        let values = values
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Ok(());
        }
        self.target
            .apply_container_op(&self.path, ContainerOp::Extend(values))
    }

    pub fn insert(&mut self, idx: usize, value: impl Serialize) -> Result<()> {
        if idx > self.len() {
            return Err(OdmError::validation(format!(
                "insert index {} out of range for '{}'",
                idx, self.path
            )));
        }
        let value = serde_json::to_value(value)?;
        self.target
            .apply_container_op(&self.path, ContainerOp::Insert(idx, value))
    }

    /// Removes every element equal to `value`. Returns how many were removed.
    pub fn remove(&mut self, value: impl Serialize) -> Result<usize> {
        let value = serde_json::to_value(value)?;
        let before = self.len();
        self.target
            .apply_container_op(&self.path, ContainerOp::RemoveValue(value))?;
        Ok(before - self.len())
    }

    pub fn remove_at(&mut self, idx: usize) -> Result<Value> {
        let Some(removed) = self.get(idx).cloned() else {
            return Err(OdmError::validation(format!(
                "index {} out of range for '{}'",
                idx, self.path
            )));
        };
        self.target
            .apply_container_op(&self.path, ContainerOp::RemoveAt(idx))?;
        Ok(removed)
    }

    pub fn pop(&mut self) -> Result<Option<Value>> {
        let Some(last) = self.items().last().cloned() else {
            return Ok(None);
        };
        self.target
            .apply_container_op(&self.path, ContainerOp::PopLast)?;
        Ok(Some(last))
    }

    pub fn pop_front(&mut self) -> Result<Option<Value>> {
        let Some(first) = self.items().first().cloned() else {
            return Ok(None);
        };
        self.target
            .apply_container_op(&self.path, ContainerOp::PopFirst)?;
        Ok(Some(first))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.target
            .apply_container_op(&self.path, ContainerOp::Clear { map: false })
    }
}

/// Mutating view over a map attribute.
pub struct MapMut<'a, T: Tracked + ?Sized> {
    target: &'a mut T,
    path: String,
}

impl<'a, T: Tracked + ?Sized> MapMut<'a, T> {
    pub fn new(target: &'a mut T, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        match target.tracked_value(&path) {
            None | Some(Value::Null) | Some(Value::Object(_)) => Ok(Self { target, path }),
            Some(other) => Err(OdmError::validation(format!(
                "'{}' holds {} and is not a map",
                path, other
            ))),
        }
    }

    fn entries(&self) -> Option<&Map<String, Value>> {
        match self.target.tracked_value(&self.path) {
            Some(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries().and_then(|map| map.get(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries().map_or(0, Map::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        check_key(key)?;
        let value = serde_json::to_value(value)?;
        self.target
            .apply_container_op(&self.path, ContainerOp::SetKey(key.to_string(), value))
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        check_key(key)?;
        let Some(previous) = self.get(key).cloned() else {
            return Ok(None);
        };
        self.target
            .apply_container_op(&self.path, ContainerOp::UnsetKey(key.to_string()))?;
        Ok(Some(previous))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.target
            .apply_container_op(&self.path, ContainerOp::Clear { map: true })
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('.') || key.starts_with('$') {
        return Err(OdmError::validation(format!("invalid map key '{}'", key)));
    }
    Ok(())
}
