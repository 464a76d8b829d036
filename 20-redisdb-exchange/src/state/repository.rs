use std::marker::PhantomData;

use tracing::{error, warn};
use uuid::Uuid;

use super::State;
use crate::{
    error::{Error, Result},
    kv::KvClient,
};

/// Read side of the state store.
pub struct StatesRepository<C, S> {
    client: C,
    _state: PhantomData<fn() -> S>,
}

impl<C, S> StatesRepository<C, S>
where
    C: KvClient,
    S: State,
{
    pub fn new(client: C) -> Self {
        Self {
            client,
            _state: PhantomData,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Loads a state, `None` when the key is absent.
    ///
    /// A stored document that no longer decodes is removed and reported as
    /// [`Error::InvalidState`].
    pub async fn find(&self, id: Uuid, database: u16) -> Result<Option<S>> {
        let Some(raw) = self.find_raw(id, database).await? else {
            return Ok(None);
        };
        decode_or_evict(&self.client, id, &raw, database).await.map(Some)
    }

    /// The stored JSON exactly as it sits on the server.
    pub async fn find_raw(&self, id: Uuid, database: u16) -> Result<Option<String>> {
        self.client.get(database, &id.to_string()).await
    }
}

/// Decodes a stored document, deleting the key from `database` when it is corrupt.
pub(crate) async fn decode_or_evict<C, S>(
    client: &C,
    id: Uuid,
    raw: &str,
    database: u16,
) -> Result<S>
where
    C: KvClient + ?Sized,
    S: State,
{
    match serde_json::from_str(raw) {
        Ok(state) => Ok(state),
        Err(err) => {
            error!(%id, error = %err, "stored state could not be decoded, removing it");
            if let Err(del_err) = client.del(database, &id.to_string()).await {
                warn!(%id, error = %del_err, "failed to remove corrupt state");
            }
            Err(Error::InvalidState(format!(
                "state {id} could not be loaded: {err}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::testing::{DeviceState, MemoryKv};

    const ID: &str = "0b2f4d8e-1c3a-4e5f-8a9b-0c1d2e3f4a5b";

    fn id() -> Uuid {
        Uuid::parse_str(ID).expect("uuid")
    }

    #[tokio::test]
    async fn absent_key_is_none() {
        let kv = Arc::new(MemoryKv::default());
        let repository = StatesRepository::<_, DeviceState>::new(kv.clone());

        assert_eq!(repository.find(id(), 1).await.expect("find"), None);
        assert_eq!(kv.commands(), ["SELECT 1".to_string(), format!("GET {ID}")]);
    }

    #[tokio::test]
    async fn decodes_from_the_selected_database() {
        let kv = Arc::new(MemoryKv::default());
        kv.insert(
            3,
            ID,
            &format!(r#"{{"id":"{ID}","actualValue":21.5,"expectedValue":null,"pending":true,"createdAt":"2020-04-01T12:00:00+00:00","updatedAt":null}}"#),
        );
        let repository = StatesRepository::<_, DeviceState>::new(kv.clone());

        assert_eq!(repository.find(id(), 0).await.expect("other db"), None);

        let state = repository
            .find(id(), 3)
            .await
            .expect("find")
            .expect("stored state");
        assert_eq!(state.id, id());
        assert_eq!(state.actual_value, Some(21.5));
        assert!(state.pending);
        assert!(state.created_at.is_some());
    }

    #[tokio::test]
    async fn corrupt_state_is_removed() {
        let kv = Arc::new(MemoryKv::default());
        kv.insert(5, ID, r#"{"id":"not-a-uuid"}"#);
        let repository = StatesRepository::<_, DeviceState>::new(kv.clone());

        let err = repository.find(id(), 5).await.expect_err("corrupt");

        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(kv.stored(5, ID), None);
        assert_eq!(
            kv.commands()[2..],
            ["SELECT 5".to_string(), format!("DEL {ID}")]
        );
    }
}
