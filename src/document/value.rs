//! Value ordering, dotted-path access and update application.
//!
//! Ordering across types follows the document-store convention:
//! null < numbers < strings < objects < arrays < booleans.

use super::driver::DriverError;
use super::types::{Document, UpdateDoc, UpdateOp};
use serde_json::{Map, Value};
use std::cmp::Ordering;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Equality under [`compare_values`], so `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Null, empty string, empty array and empty object count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// First segment of a dotted path.
pub fn root_field(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn walk_mut<'a>(mut current: &'a mut Value, segments: &[&str], create: bool) -> Option<&'a mut Value> {
    for segment in segments {
        if create && current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => {
                if create {
                    map.entry(segment.to_string()).or_insert(Value::Null)
                } else {
                    map.get_mut(*segment)?
                }
            }
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Runs `f` against the document as a `Value::Object` root.
fn with_root<T>(doc: &mut Document, f: impl FnOnce(&mut Value) -> T) -> T {
    let mut root = Value::Object(std::mem::take(doc));
    let out = f(&mut root);
    if let Value::Object(map) = root {
        *doc = map;
    }
    out
}

pub fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), DriverError> {
    let segments: Vec<&str> = path.split('.').collect();
    with_root(doc, |root| match walk_mut(root, &segments, true) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(DriverError::Other(format!("cannot set path '{}'", path))),
    })
}

pub fn unset_path(doc: &mut Document, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last()?;
    with_root(doc, |root| match walk_mut(root, parents, false)? {
        Value::Object(map) => map.remove(*last),
        Value::Array(items) => {
            let idx = last.parse::<usize>().ok()?;
            items
                .get_mut(idx)
                .map(|slot| std::mem::replace(slot, Value::Null))
        }
        _ => None,
    })
}

fn array_at<'a>(root: &'a mut Value, path: &str, create: bool) -> Result<Option<&'a mut Vec<Value>>, DriverError> {
    let segments: Vec<&str> = path.split('.').collect();
    match walk_mut(root, &segments, create) {
        None => Ok(None),
        Some(slot) => {
            if slot.is_null() {
                if !create {
                    return Ok(None);
                }
                *slot = Value::Array(Vec::new());
            }
            match slot {
                Value::Array(items) => Ok(Some(items)),
                _ => Err(DriverError::Other(format!("field '{}' is not an array", path))),
            }
        }
    }
}

fn apply_op(root: &mut Value, op: &UpdateOp) -> Result<(), DriverError> {
    match op {
        UpdateOp::Set(path, value) => {
            let segments: Vec<&str> = path.split('.').collect();
            let slot = walk_mut(root, &segments, true)
                .ok_or_else(|| DriverError::Other(format!("cannot set path '{}'", path)))?;
            *slot = value.clone();
        }
        // Applied on the document itself by `apply_update`.
        UpdateOp::Unset(_) => {}
        UpdateOp::Inc(path, by) => {
            let segments: Vec<&str> = path.split('.').collect();
            let slot = walk_mut(root, &segments, true)
                .ok_or_else(|| DriverError::Other(format!("cannot increment '{}'", path)))?;
            *slot = match (&*slot, by) {
                (Value::Null, by) => by.clone(),
                (Value::Number(cur), Value::Number(by)) => match (cur.as_i64(), by.as_i64()) {
                    (Some(a), Some(b)) => Value::from(a + b),
                    _ => Value::from(cur.as_f64().unwrap_or(0.0) + by.as_f64().unwrap_or(0.0)),
                },
                _ => {
                    return Err(DriverError::Other(format!(
                        "cannot increment non-numeric field '{}'",
                        path
                    )));
                }
            };
        }
        UpdateOp::Push {
            path,
            values,
            position,
        } => {
            if let Some(items) = array_at(root, path, true)? {
                let at = position.unwrap_or(items.len()).min(items.len());
                for (offset, value) in values.iter().enumerate() {
                    items.insert(at + offset, value.clone());
                }
            }
        }
        UpdateOp::Pull(path, value) => {
            if let Some(items) = array_at(root, path, false)? {
                items.retain(|item| !values_equal(item, value));
            }
        }
        UpdateOp::PopFirst(path) => {
            if let Some(items) = array_at(root, path, false)?
                && !items.is_empty()
            {
                items.remove(0);
            }
        }
        UpdateOp::PopLast(path) => {
            if let Some(items) = array_at(root, path, false)? {
                items.pop();
            }
        }
        UpdateOp::RemoveAt(path, idx) => {
            if let Some(items) = array_at(root, path, false)?
                && *idx < items.len()
            {
                items.remove(*idx);
            }
        }
    }
    Ok(())
}

/// Applies every op in order. Shared by the in-memory backend and by instances replaying
/// their pending updates locally.
pub fn apply_update(doc: &mut Document, update: &UpdateDoc) -> Result<(), DriverError> {
    for op in &update.0 {
        if let UpdateOp::Unset(path) = op {
            unset_path(doc, path);
            continue;
        }
        with_root(doc, |root| apply_op(root, op))?;
    }
    Ok(())
}
