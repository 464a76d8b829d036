use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ID_FIELD;
use crate::{
    clock::atom,
    error::{Error, Result},
};

/// Timestamp role of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stamp {
    #[default]
    None,
    /// Defaults to the current time on create.
    Created,
    /// Set to the current time on every update.
    Updated,
}

/// One declared field of a state document.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
    pub default: Option<Value>,
    pub stamp: Stamp,
}

impl FieldSpec {
    /// Must be supplied on create.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
            stamp: Stamp::None,
        }
    }

    /// Written as `null` when not supplied.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            stamp: Stamp::None,
        }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            default: Some(default.into()),
            ..Self::optional(name)
        }
    }

    pub fn created_at(name: impl Into<String>) -> Self {
        Self {
            stamp: Stamp::Created,
            ..Self::optional(name)
        }
    }

    pub fn updated_at(name: impl Into<String>) -> Self {
        Self {
            stamp: Stamp::Updated,
            ..Self::optional(name)
        }
    }
}

/// Values handed to create or update, already normalised to JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues(Map<String, Value>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds any serializable value, e.g. an enum or a nested struct.
    pub fn try_with(mut self, name: impl Into<String>, value: &impl Serialize) -> Result<Self> {
        self.0.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Adds a timestamp in the stored `2020-04-01T12:00:00+00:00` form.
    pub fn with_time<Tz: TimeZone>(self, name: impl Into<String>, ts: &DateTime<Tz>) -> Self {
        self.with(name, atom(ts))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

impl From<Map<String, Value>> for FieldValues {
    fn from(values: Map<String, Value>) -> Self {
        Self(values)
    }
}

/// Builds a new document from the create fields.
pub(crate) fn build_document(
    id: Uuid,
    specs: &[FieldSpec],
    values: &FieldValues,
    now: &DateTime<Utc>,
) -> Result<Map<String, Value>> {
    let mut document = Map::new();
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));

    for spec in specs.iter().filter(|spec| spec.name != ID_FIELD) {
        let value = match values.get(&spec.name) {
            Some(value) => value.clone(),
            None if spec.required => {
                return Err(Error::InvalidArgument(format!(
                    "value for required field `{}` was not provided",
                    spec.name
                )))
            }
            None if spec.stamp == Stamp::Created => Value::String(atom(now)),
            None => spec.default.clone().unwrap_or(Value::Null),
        };
        document.insert(spec.name.clone(), value);
    }

    Ok(document)
}

/// Applies supplied values to a stored document, returning whether anything
/// but the update stamp changed.
pub(crate) fn apply_update(
    document: &mut Map<String, Value>,
    specs: &[FieldSpec],
    values: &FieldValues,
    now: &DateTime<Utc>,
) -> bool {
    let mut dirty = false;

    for spec in specs.iter().filter(|spec| spec.name != ID_FIELD) {
        if spec.stamp == Stamp::Updated {
            document.insert(spec.name.clone(), Value::String(atom(now)));
            continue;
        }
        let Some(value) = values.get(&spec.name) else {
            continue;
        };
        if document.get(&spec.name) != Some(value) {
            document.insert(spec.name.clone(), value.clone());
            dirty = true;
        }
    }

    dirty
}
