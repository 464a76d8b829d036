use std::{marker::PhantomData, sync::Arc};

use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    FieldSpec, FieldValues, State,
    fields::{apply_update, build_document},
    repository::decode_or_evict,
};
use crate::{
    clock::Clock,
    error::{Error, Result},
    kv::KvClient,
};

/// Result of [`StatesManager::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<S> {
    /// The document was rewritten; holds what the store returned afterwards.
    Updated(S),
    /// No declared field changed, nothing was written.
    Unchanged,
}

impl<S> UpdateOutcome<S> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// The updated state, or `previous` when nothing changed.
    pub fn unwrap_or(self, previous: S) -> S {
        match self {
            Self::Updated(state) => state,
            Self::Unchanged => previous,
        }
    }
}

/// Write side of the state store.
pub struct StatesManager<C, S> {
    client: C,
    clock: Arc<dyn Clock>,
    create_fields: Vec<FieldSpec>,
    update_fields: Vec<FieldSpec>,
    _state: PhantomData<fn() -> S>,
}

impl<C, S> StatesManager<C, S>
where
    C: KvClient,
    S: State,
{
    pub fn new(client: C, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            clock,
            create_fields: S::create_fields(),
            update_fields: S::update_fields(),
            _state: PhantomData,
        }
    }

    /// Replaces the field declarations of `S`.
    pub fn with_fields(mut self, create: Vec<FieldSpec>, update: Vec<FieldSpec>) -> Self {
        self.create_fields = create;
        self.update_fields = update;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Writes a new state and returns it as read back from the store.
    pub async fn create(&self, id: Uuid, values: &FieldValues, database: u16) -> Result<S> {
        let document = build_document(id, &self.create_fields, values, &self.clock.now())?;
        let raw = self.write(id, &document, database).await?;
        decode_or_evict(&self.client, id, &raw, database).await
    }

    /// Rewrites the declared update fields that differ from what is stored.
    ///
    /// Fails with [`Error::NotFound`] when `state` is no longer stored.
    pub async fn update(
        &self,
        state: &S,
        values: &FieldValues,
        database: u16,
    ) -> Result<UpdateOutcome<S>> {
        let id = state.id();
        match self.try_update(id, values, database).await? {
            Some(updated) => Ok(UpdateOutcome::Updated(updated)),
            None => {
                debug!(%id, "state unchanged, skipping write");
                Ok(UpdateOutcome::Unchanged)
            }
        }
    }

    /// Updates the state when it exists and creates it otherwise.
    ///
    /// An update that changes nothing returns the stored state.
    pub async fn upsert(&self, id: Uuid, values: &FieldValues, database: u16) -> Result<S> {
        match self.try_update(id, values, database).await {
            Ok(Some(updated)) => Ok(updated),
            Ok(None) => {
                let raw = self.read(id, database).await?.ok_or_else(|| {
                    Error::NotFound(format!("state {id} disappeared during upsert"))
                })?;
                decode_or_evict(&self.client, id, &raw, database).await
            }
            Err(Error::NotFound(_)) => {
                debug!(%id, "state not stored yet, creating it");
                self.create(id, values, database).await
            }
            Err(err) => Err(err),
        }
    }

    /// Removes a state. Deleting an absent key succeeds.
    pub async fn delete(&self, id: Uuid, database: u16) -> Result<()> {
        if !self.client.del(database, &id.to_string()).await? {
            debug!(%id, "state was already absent");
        }
        Ok(())
    }

    /// `None` when no declared field changed.
    async fn try_update(&self, id: Uuid, values: &FieldValues, database: u16) -> Result<Option<S>> {
        let raw = self
            .read(id, database)
            .await?
            .ok_or_else(|| Error::NotFound(format!("state {id} is not stored")))?;

        let mut document = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(document)) => document,
            _ => {
                error!(%id, "stored state is not a JSON object, removing it");
                if let Err(err) = self.client.del(database, &id.to_string()).await {
                    warn!(%id, error = %err, "failed to remove corrupt state");
                }
                return Err(Error::InvalidState(format!(
                    "state {id} could not be loaded"
                )));
            }
        };

        if !apply_update(&mut document, &self.update_fields, values, &self.clock.now()) {
            return Ok(None);
        }

        let raw = self.write(id, &document, database).await?;
        decode_or_evict(&self.client, id, &raw, database).await.map(Some)
    }

    async fn read(&self, id: Uuid, database: u16) -> Result<Option<String>> {
        self.client.get(database, &id.to_string()).await
    }

    /// `SET` followed by a read-back of what was stored.
    async fn write(&self, id: Uuid, document: &Map<String, Value>, database: u16) -> Result<String> {
        let key = id.to_string();
        let encoded = serde_json::to_string(document)?;

        if !self.client.set(database, &key, &encoded).await? {
            return Err(Error::InvalidState(format!("state {id} could not be saved")));
        }

        self.client
            .get(database, &key)
            .await?
            .filter(|stored| !stored.is_empty())
            .ok_or_else(|| Error::NotUpdated(format!("state {id} could not be read back")))
    }
}
