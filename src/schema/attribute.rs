use crate::error::{OdmError, Result};

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

/// Zero-argument value generator used as an attribute default.
pub type Generator = Arc<dyn Fn() -> Value + Send + Sync>;

/// Returns `false` to reject a coerced value.
pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Generator(Generator),
}

/// Typed field descriptor. Secondary shard models share their primary's descriptors, so an
/// attribute remembers every model that uses it.
pub struct Attribute {
    name: String,
    kind: AttrType,
    default: Option<DefaultValue>,
    validator: Option<Validator>,
    models: DashSet<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: AttrType) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            validator: None,
            models: DashSet::new(),
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Literal(value.into()));
        self
    }

    pub fn with_default_fn(mut self, generator: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.default = Some(DefaultValue::Generator(Arc::new(generator)));
        self
    }

    pub fn with_validator(mut self, validator: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttrType {
        self.kind
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// A fresh default; generators run on every call.
    pub fn default_value(&self) -> Option<Value> {
        match &self.default {
            Some(DefaultValue::Literal(value)) => Some(value.clone()),
            Some(DefaultValue::Generator(generator)) => Some(generator()),
            None => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, AttrType::List | AttrType::Map)
    }

    /// Converts `value` to the declared type and runs the validator. Null always passes.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        let coerced = match (self.kind, value) {
            (AttrType::Any, value) => Some(value),
            (AttrType::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
            (AttrType::Bool, Value::String(s)) => match s.to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (AttrType::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            (AttrType::Int, Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Some(Value::from(i)),
                (None, Some(f)) if f.fract() == 0.0 => Some(Value::from(f as i64)),
                _ => None,
            },
            (AttrType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (AttrType::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (AttrType::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
            (AttrType::Str, Value::String(s)) => Some(Value::String(s)),
            (AttrType::Str, Value::Number(n)) => Some(Value::String(n.to_string())),
            (AttrType::Str, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (AttrType::List, Value::Array(items)) => Some(Value::Array(items)),
            (AttrType::Map, Value::Object(map)) => Some(Value::Object(map)),
            _ => None,
        };
        let Some(coerced) = coerced else {
            return Err(OdmError::validation(format!(
                "attribute '{}' expects {:?}",
                self.name, self.kind
            )));
        };
        if let Some(validator) = &self.validator
            && !validator(&coerced)
        {
            return Err(OdmError::validation(format!(
                "value {} rejected for attribute '{}'",
                coerced, self.name
            )));
        }
        Ok(coerced)
    }

    /// Names of the models sharing this descriptor.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.models.iter().map(|m| m.key().clone()).collect();
        models.sort();
        models
    }

    pub(crate) fn attach(&self, model: &str) {
        self.models.insert(model.to_string());
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("has_default", &self.default.is_some())
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}
