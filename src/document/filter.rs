//! Predicate evaluation and field introspection for [`Filter`].

use super::types::{Document, Filter};
use super::value::{compare_values, get_path, root_field, values_equal};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, target) => eq_matches(get_path(doc, path), target),
            Filter::Ne(path, target) => !eq_matches(get_path(doc, path), target),
            Filter::Gt(path, target) => cmp_matches(get_path(doc, path), target, |o| o == Ordering::Greater),
            Filter::Gte(path, target) => cmp_matches(get_path(doc, path), target, |o| o != Ordering::Less),
            Filter::Lt(path, target) => cmp_matches(get_path(doc, path), target, |o| o == Ordering::Less),
            Filter::Lte(path, target) => cmp_matches(get_path(doc, path), target, |o| o != Ordering::Greater),
            Filter::In(path, targets) => {
                let found = get_path(doc, path);
                targets.iter().any(|target| eq_matches(found, target))
            }
            Filter::Nin(path, targets) => {
                let found = get_path(doc, path);
                !targets.iter().any(|target| eq_matches(found, target))
            }
            Filter::Exists(path, present) => get_path(doc, path).is_some() == *present,
            Filter::Regex(path, pattern) => match get_path(doc, path) {
                Some(Value::String(text)) => pattern.is_match(text),
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }

    /// Top-level attribute names referenced anywhere in the predicate.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Filter::All => {}
            Filter::Eq(path, _)
            | Filter::Ne(path, _)
            | Filter::Gt(path, _)
            | Filter::Gte(path, _)
            | Filter::Lt(path, _)
            | Filter::Lte(path, _)
            | Filter::In(path, _)
            | Filter::Nin(path, _)
            | Filter::Exists(path, _)
            | Filter::Regex(path, _) => {
                out.insert(root_field(path).to_string());
            }
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.collect_fields(out);
                }
            }
        }
    }

    /// Values the predicate pins `field` to, via equality or membership at the top level or
    /// inside a conjunction. `None` when the field is unconstrained.
    pub fn pinned_values(&self, field: &str) -> Option<Vec<Value>> {
        match self {
            Filter::Eq(path, value) if path == field && !value.is_array() => Some(vec![value.clone()]),
            Filter::In(path, values) if path == field => Some(values.clone()),
            Filter::And(filters) => filters.iter().find_map(|f| f.pinned_values(field)),
            _ => None,
        }
    }
}

fn eq_matches(found: Option<&Value>, target: &Value) -> bool {
    match found {
        None => target.is_null(),
        Some(Value::Array(items)) if !target.is_array() => items.iter().any(|item| values_equal(item, target)),
        Some(value) => values_equal(value, target),
    }
}

fn cmp_matches(found: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let same_kind = |value: &Value| {
        std::mem::discriminant(value) == std::mem::discriminant(target)
    };
    match found {
        None => false,
        Some(Value::Array(items)) if !target.is_array() => items
            .iter()
            .any(|item| same_kind(item) && accept(compare_values(item, target))),
        Some(value) => same_kind(value) && accept(compare_values(value, target)),
    }
}
