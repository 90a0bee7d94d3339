use crate::document::types::UpdateOp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One in-place mutation of a list or map attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerOp {
    Append(Value),
    Extend(Vec<Value>),
    Insert(usize, Value),
    /// Removes every element equal to the value.
    RemoveValue(Value),
    RemoveAt(usize),
    PopFirst,
    PopLast,
    Clear { map: bool },
    SetKey(String, Value),
    UnsetKey(String),
}

impl ContainerOp {
    /// Store update operator for this mutation of the container at `path`.
    pub fn to_update_op(&self, path: &str) -> UpdateOp {
        match self {
            ContainerOp::Append(value) => UpdateOp::Push {
                path: path.to_string(),
                values: vec![value.clone()],
                position: None,
            },
            ContainerOp::Extend(values) => UpdateOp::Push {
                path: path.to_string(),
                values: values.clone(),
                position: None,
            },
            ContainerOp::Insert(idx, value) => UpdateOp::Push {
                path: path.to_string(),
                values: vec![value.clone()],
                position: Some(*idx),
            },
            ContainerOp::RemoveValue(value) => UpdateOp::Pull(path.to_string(), value.clone()),
            ContainerOp::RemoveAt(idx) => UpdateOp::RemoveAt(path.to_string(), *idx),
            ContainerOp::PopFirst => UpdateOp::PopFirst(path.to_string()),
            ContainerOp::PopLast => UpdateOp::PopLast(path.to_string()),
            ContainerOp::Clear { map: true } => UpdateOp::Set(path.to_string(), Value::Object(Map::new())),
            ContainerOp::Clear { map: false } => UpdateOp::Set(path.to_string(), Value::Array(Vec::new())),
            ContainerOp::SetKey(key, value) => UpdateOp::Set(format!("{}.{}", path, key), value.clone()),
            ContainerOp::UnsetKey(key) => UpdateOp::Unset(format!("{}.{}", path, key)),
        }
    }
}
