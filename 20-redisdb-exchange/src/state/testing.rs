use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use uuid::Uuid;

use super::{CREATED_AT_FIELD, FieldSpec, State, UPDATED_AT_FIELD};
use crate::{error::Result, kv::KvClient};

/// In-memory store recording every command it receives.
#[derive(Default)]
pub(crate) struct MemoryKv {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    databases: HashMap<u16, HashMap<String, String>>,
    log: Vec<String>,
}

impl MemoryInner {
    /// Logs the command with the `SELECT` it is paired with.
    fn record(&mut self, database: u16, command: String) -> &mut HashMap<String, String> {
        self.log.push(format!("SELECT {database}"));
        self.log.push(command);
        self.databases.entry(database).or_default()
    }
}

impl MemoryKv {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, database: u16, key: &str, value: &str) {
        self.lock()
            .databases
            .entry(database)
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub(crate) fn stored(&self, database: u16, key: &str) -> Option<String> {
        self.lock()
            .databases
            .get(&database)
            .and_then(|keys| keys.get(key).cloned())
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub(crate) fn set_calls(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|command| command.starts_with("SET "))
            .count()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, database: u16, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock();
        Ok(inner.record(database, format!("GET {key}")).get(key).cloned())
    }

    async fn set(&self, database: u16, key: &str, value: &str) -> Result<bool> {
        let mut inner = self.lock();
        inner
            .record(database, format!("SET {key}"))
            .insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn del(&self, database: u16, key: &str) -> Result<bool> {
        let mut inner = self.lock();
        Ok(inner.record(database, format!("DEL {key}")).remove(key).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeviceState {
    pub id: Uuid,
    pub actual_value: Option<f64>,
    pub expected_value: Option<f64>,
    pub pending: bool,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub updated_at: Option<DateTime<FixedOffset>>,
}

impl State for DeviceState {
    fn id(&self) -> Uuid {
        self.id
    }

    fn create_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::optional("actualValue"),
            FieldSpec::optional("expectedValue"),
            FieldSpec::with_default("pending", false),
            FieldSpec::created_at(CREATED_AT_FIELD),
            FieldSpec::optional(UPDATED_AT_FIELD),
        ]
    }

    fn update_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::optional("actualValue"),
            FieldSpec::optional("expectedValue"),
            FieldSpec::optional("pending"),
            FieldSpec::updated_at(UPDATED_AT_FIELD),
        ]
    }
}
