use super::instance::Instance;
use crate::document::types::{Filter, Sort};
use crate::error::Result;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Typed handle to one attribute, usable as a `const`:
///
/// ```ignore
/// const AGE: Field<i64> = Field::new("age");
/// AGE.set(&mut person, 42)?;
/// let adults = people.query(QueryRequest::new(AGE.gte(18)?)).await?;
/// ```
pub struct Field<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T: Serialize + DeserializeOwned> Field<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, instance: &Instance) -> Result<Option<T>> {
        instance.get(self.name)
    }

    pub fn set(&self, instance: &mut Instance, value: T) -> Result<()> {
        instance.set(self.name, value)
    }

    pub fn eq(&self, value: T) -> Result<Filter> {
        Ok(Filter::Eq(self.name.to_string(), serde_json::to_value(value)?))
    }

    pub fn is_in(&self, values: impl IntoIterator<Item = T>) -> Result<Filter> {
        let values = values
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Filter::In(self.name.to_string(), values))
    }

    pub fn gt(&self, value: T) -> Result<Filter> {
        Ok(Filter::Gt(self.name.to_string(), serde_json::to_value(value)?))
    }

    pub fn gte(&self, value: T) -> Result<Filter> {
        Ok(Filter::Gte(self.name.to_string(), serde_json::to_value(value)?))
    }

    pub fn lt(&self, value: T) -> Result<Filter> {
        Ok(Filter::Lt(self.name.to_string(), serde_json::to_value(value)?))
    }

    pub fn lte(&self, value: T) -> Result<Filter> {
        Ok(Filter::Lte(self.name.to_string(), serde_json::to_value(value)?))
    }

    pub fn asc(&self) -> Sort {
        Sort::asc(self.name)
    }

    pub fn desc(&self) -> Sort {
        Sort::desc(self.name)
    }
}
