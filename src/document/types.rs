//! Document, query and update vocabulary shared by the driver contract and the engines.

use super::value::{compare_values, get_path};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Reserved version field, the optimistic-concurrency token.
pub const VERSION_FIELD: &str = "_";
/// Store-assigned document id.
pub const ID_FIELD: &str = "_id";
/// Advisory locks live under this field and are never part of the declared attributes.
pub const LOCKS_FIELD: &str = "_locks";

/// Regular expression compiled once when the filter is built. Compares and serializes as its
/// source text.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(Regex::new(pattern)?))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Query predicate. Field names are dotted paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    Nin(String, Vec<Value>),
    Exists(String, bool),
    Regex(String, Pattern),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte(field.into(), value.into())
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn exists(field: impl Into<String>, present: bool) -> Self {
        Filter::Exists(field.into(), present)
    }

    /// Fails when `pattern` is not a valid regular expression.
    pub fn regex(field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Filter::Regex(field.into(), Pattern::new(pattern)?))
    }

    /// Conjunction that flattens nested `And`s and drops `All`.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut parts = Vec::new();
        for filter in filters {
            match filter {
                Filter::All => {}
                Filter::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Equality on every `(field, value)` pair of `keys`.
    pub fn from_document(keys: &Document) -> Self {
        Filter::and(
            keys.iter()
                .map(|(field, value)| Filter::Eq(field.clone(), value.clone())),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Ordered list of sort keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort(pub Vec<SortKey>);

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort(vec![SortKey {
            field: field.into(),
            descending: false,
        }])
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort(vec![SortKey {
            field: field.into(),
            descending: true,
        }])
    }

    pub fn then_asc(mut self, field: impl Into<String>) -> Self {
        self.0.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn then_desc(mut self, field: impl Into<String>) -> Self {
        self.0.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|key| key.field.as_str())
    }

    /// Missing fields sort as null.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.0 {
            let left = get_path(a, &key.field).unwrap_or(&Value::Null);
            let right = get_path(b, &key.field).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Sort>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// One step of an update. Steps are applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, Value),
    /// Append `values`, or insert them at `position`.
    Push {
        path: String,
        values: Vec<Value>,
        position: Option<usize>,
    },
    /// Remove every element equal to the value.
    Pull(String, Value),
    PopFirst(String),
    PopLast(String),
    RemoveAt(String, usize),
}

impl UpdateOp {
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set(path, _)
            | UpdateOp::Unset(path)
            | UpdateOp::Inc(path, _)
            | UpdateOp::Pull(path, _)
            | UpdateOp::PopFirst(path)
            | UpdateOp::PopLast(path)
            | UpdateOp::RemoveAt(path, _) => path,
            UpdateOp::Push { path, .. } => path,
        }
    }
}

/// An ordered update payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDoc(pub Vec<UpdateOp>);

impl UpdateDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(UpdateOp::Set(path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.0.push(UpdateOp::Unset(path.into()));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.0.push(UpdateOp::Inc(path.into(), by.into()));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(UpdateOp::Push {
            path: path.into(),
            values: vec![value.into()],
            position: None,
        });
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(UpdateOp::Pull(path.into(), value.into()));
        self
    }

    pub fn op(mut self, op: UpdateOp) -> Self {
        self.0.push(op);
        self
    }

    pub fn extend(&mut self, other: UpdateDoc) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Index definition as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(keys: Vec<String>, unique: bool) -> Self {
        let name = keys
            .iter()
            .map(|key| format!("{}_1", key))
            .collect::<Vec<_>>()
            .join("_");
        Self { name, keys, unique }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}
