//! Keyed JSON state store.
//!
//! Each state is one JSON object stored under its UUID. Which keys a record
//! carries is declared with [`FieldSpec`]s: [`StatesManager::create`] builds
//! the document from the create fields and [`StatesManager::update`] only
//! rewrites it when a declared update field actually changed. Typed records are
//! plain serde structs implementing [`State`], so renames such as
//! `created_at` <-> `createdAt` are ordinary serde attributes.
//!
//! Every command is queued together with the `SELECT` of its logical
//! database, so one connection can serve several databases even when tasks
//! share it concurrently.

mod fields;
mod manager;
mod repository;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::serialize_atom;

pub use fields::{FieldSpec, FieldValues, Stamp};
pub use manager::{StatesManager, UpdateOutcome};
pub use repository::StatesRepository;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A record kept in the state store.
///
/// The `id` key is always written; the declared fields come on top of it.
pub trait State: DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Fields written by [`StatesManager::create`].
    fn create_fields() -> Vec<FieldSpec> {
        Vec::new()
    }

    /// Fields [`StatesManager::update`] may change.
    fn update_fields() -> Vec<FieldSpec> {
        Vec::new()
    }
}

/// Untyped state: timestamps plus whatever other keys the document holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub id: Uuid,
    #[serde(
        rename = "createdAt",
        default,
        serialize_with = "serialize_atom"
    )]
    pub created_at: Option<DateTime<FixedOffset>>,
    #[serde(
        rename = "updatedAt",
        default,
        serialize_with = "serialize_atom"
    )]
    pub updated_at: Option<DateTime<FixedOffset>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl State for StateRecord {
    fn id(&self) -> Uuid {
        self.id
    }

    fn create_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::created_at(CREATED_AT_FIELD),
            FieldSpec::optional(UPDATED_AT_FIELD),
        ]
    }

    fn update_fields() -> Vec<FieldSpec> {
        vec![FieldSpec::updated_at(UPDATED_AT_FIELD)]
    }
}
