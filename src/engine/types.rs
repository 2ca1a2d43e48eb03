use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// A fetched record. Opaque to the scheduler apart from named-field equality.
pub type Row = serde_json::Map<String, Value>;

// =============================================================================
// ResourceType
// =============================================================================

/// Closed set of domain entities the poller knows how to batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Leads,
    Projects,
    Clients,
    Conversations,
    Messages,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Leads,
        ResourceType::Projects,
        ResourceType::Clients,
        ResourceType::Conversations,
        ResourceType::Messages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Leads => "leads",
            ResourceType::Projects => "projects",
            ResourceType::Clients => "clients",
            ResourceType::Conversations => "conversations",
            ResourceType::Messages => "messages",
        }
    }

    /// Backing table in the BaaS schema.
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| AppError::UnknownResource(s.to_string()))
    }
}

// =============================================================================
// Predicate
// =============================================================================

/// Equality filter a subscriber applies to its resource type.
///
/// Every field must be present in a row and equal to the given scalar.
/// An empty predicate matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate(BTreeMap<String, Value>);

impl Predicate {
    /// Matches every row of the resource type.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Parse a predicate from a JSON object, e.g. `{"project_id": "p1"}`.
    /// `null` is accepted as "all rows".
    pub fn from_json(value: &Value) -> Result<Self, AppError> {
        let pred = match value {
            Value::Null => Self::all(),
            Value::Object(map) => Self(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            other => {
                return Err(AppError::Validation(format!(
                    "predicate must be a JSON object, got {other}"
                )))
            }
        };
        pred.validate()?;
        Ok(pred)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reject anything the merge strategy cannot union safely: only named
    /// fields with scalar equality values are supported.
    ///
    /// Numbers compare by value, so `1` matches a stored `1.0`. Strings never
    /// match numbers: `"1"` and `1` are different values.
    pub fn validate(&self) -> Result<(), AppError> {
        for (field, value) in &self.0 {
            if field.is_empty() {
                return Err(AppError::Validation("predicate field name is empty".into()));
            }
            if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(AppError::Validation(format!(
                    "predicate field '{field}' contains unsupported characters"
                )));
            }
            if !is_scalar(value) {
                return Err(AppError::Validation(format!(
                    "predicate field '{field}' must be a string, number or bool, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| row.get(field).is_some_and(|v| scalar_eq(v, expected)))
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// JSON equality with integer and float representations of a number unified.
fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        _ => a == b,
    }
}

fn contains_scalar(values: &[Value], value: &Value) -> bool {
    values.iter().any(|v| scalar_eq(v, value))
}

// =============================================================================
// FetchFilter
// =============================================================================

/// Merged query filter for one batch group: `field IN (values)` per field.
/// No fields means the fetch is unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchFilter {
    fields: BTreeMap<String, Vec<Value>>,
}

impl FetchFilter {
    pub fn unfiltered() -> Self {
        Self::default()
    }

    pub fn from_predicate(predicate: &Predicate) -> Self {
        Self {
            fields: predicate
                .fields()
                .map(|(k, v)| (k.to_string(), vec![v.clone()]))
                .collect(),
        }
    }

    /// Union a group of predicates into one superset filter.
    ///
    /// Any empty predicate forces an unfiltered fetch. Otherwise only fields
    /// constrained by every predicate survive, each holding the union of the
    /// requested values, so every subscriber's rows are admitted.
    pub fn merge<'a, I>(predicates: I) -> Self
    where
        I: IntoIterator<Item = &'a Predicate>,
    {
        let mut iter = predicates.into_iter();
        let Some(first) = iter.next() else {
            return Self::unfiltered();
        };
        let mut merged = Self::from_predicate(first);

        for pred in iter {
            if merged.is_unfiltered() || pred.is_empty() {
                return Self::unfiltered();
            }
            merged.fields.retain(|field, _| pred.get(field).is_some());
            for (field, values) in merged.fields.iter_mut() {
                if let Some(value) = pred.get(field) {
                    if !contains_scalar(values, value) {
                        values.push(value.clone());
                    }
                }
            }
        }
        merged
    }

    pub fn is_unfiltered(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn admits(&self, row: &Row) -> bool {
        self.fields
            .iter()
            .all(|(field, values)| row.get(field).is_some_and(|v| contains_scalar(values, v)))
    }

    /// True when every row admitted by `other` is also admitted by `self`.
    pub fn covers(&self, other: &FetchFilter) -> bool {
        self.fields.iter().all(|(field, mine)| match other.fields.get(field) {
            Some(theirs) => theirs.iter().all(|v| contains_scalar(mine, v)),
            None => false,
        })
    }
}
