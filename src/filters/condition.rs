use super::{compare, Filter};
use crate::fields::Field;
use crate::Item;
use serde_json::Value;
use std::cmp::Ordering;

/// A parsed `(attribute, filter, value)` term of a `where` clause.
#[derive(Clone, Debug)]
pub struct Condition {
    pub attribute: String,
    pub filter: Filter,
    pub value: Value,
}

impl Condition {
    pub fn equal(attribute: &str, field: Field, value: Value) -> Self {
        Condition {
            attribute: attribute.to_string(),
            filter: Filter::equal(field, attribute),
            value,
        }
    }

    /// Evaluates the condition against an in-memory item.
    pub fn matches(&self, item: &Item) -> bool {
        self.filter
            .op
            .apply(item.get(&self.attribute).unwrap_or(&Value::Null), &self.value)
    }
}

/// One `sort` term: attribute plus direction.
#[derive(Clone, Debug)]
pub struct Sort {
    pub attribute: String,
    pub field: Field,
    pub descending: bool,
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: nulls first, then by type, then by value.
pub fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    rank(a)
        .cmp(&rank(b))
        .then_with(|| compare(a, b).unwrap_or(Ordering::Equal))
}

/// Orders two items by a list of sort terms, first term most significant.
pub(crate) fn cmp_items(a: &Item, b: &Item, sort: &[Sort]) -> Ordering {
    for term in sort {
        let left = a.get(&term.attribute).unwrap_or(&Value::Null);
        let right = b.get(&term.attribute).unwrap_or(&Value::Null);
        let ordering = sort_cmp(left, right);
        let ordering = if term.descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
