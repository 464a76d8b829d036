//! Blocking facade over the async client.
//!
//! [`BlockingClient`] owns a current-thread runtime and drives every round
//! trip to completion on the calling thread. Between calls nothing runs, so
//! pushes received meanwhile are only processed on the next call. The
//! facade adds no locking of its own: share one client per thread, or wrap it
//! in external synchronisation. Do not call it from inside an async runtime.

use std::{future::Future, sync::Arc};

use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

use crate::{
    client::{Client, ConnectionState},
    clock::Clock,
    config::Config,
    error::Result,
    state::{FieldValues, State, StatesManager, StatesRepository, UpdateOutcome},
};

pub struct BlockingClient {
    client: Client,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    /// Builds the runtime and connects.
    pub fn connect(config: Config) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let client = Client::new(config);
        runtime.block_on(client.connect())?;
        Ok(Self {
            client,
            runtime: Arc::new(runtime),
        })
    }

    /// The wrapped async client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn ping(&self) -> Result<String> {
        self.block_on(self.client.ping())
    }

    pub fn select(&self, database: u16) -> Result<()> {
        self.block_on(self.client.select(database))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.block_on(self.client.get(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<bool> {
        self.block_on(self.client.set(key, value))
    }

    pub fn del(&self, key: &str) -> Result<i64> {
        self.block_on(self.client.del(key))
    }

    pub fn publish(&self, channel: &str, payload: impl AsRef<[u8]>) -> Result<i64> {
        self.block_on(self.client.publish(channel, payload))
    }

    pub fn close(&self) {
        // Enter the runtime so aborting the I/O tasks finds their scheduler.
        let _guard = self.runtime.enter();
        self.client.close();
    }

    pub fn repository<S: State>(&self) -> BlockingStatesRepository<S> {
        BlockingStatesRepository {
            runtime: Arc::clone(&self.runtime),
            inner: StatesRepository::new(self.client.clone()),
        }
    }

    pub fn manager<S: State>(&self, clock: Arc<dyn Clock>) -> BlockingStatesManager<S> {
        BlockingStatesManager {
            runtime: Arc::clone(&self.runtime),
            inner: StatesManager::new(self.client.clone(), clock),
        }
    }
}

/// Blocking [`StatesRepository`].
pub struct BlockingStatesRepository<S> {
    runtime: Arc<Runtime>,
    inner: StatesRepository<Client, S>,
}

impl<S: State> BlockingStatesRepository<S> {
    pub fn find(&self, id: Uuid, database: u16) -> Result<Option<S>> {
        self.runtime.block_on(self.inner.find(id, database))
    }

    pub fn find_raw(&self, id: Uuid, database: u16) -> Result<Option<String>> {
        self.runtime.block_on(self.inner.find_raw(id, database))
    }
}

/// Blocking [`StatesManager`].
pub struct BlockingStatesManager<S> {
    runtime: Arc<Runtime>,
    inner: StatesManager<Client, S>,
}

impl<S: State> BlockingStatesManager<S> {
    pub fn create(&self, id: Uuid, values: &FieldValues, database: u16) -> Result<S> {
        self.runtime.block_on(self.inner.create(id, values, database))
    }

    pub fn update(&self, state: &S, values: &FieldValues, database: u16) -> Result<UpdateOutcome<S>> {
        self.runtime.block_on(self.inner.update(state, values, database))
    }

    pub fn upsert(&self, id: Uuid, values: &FieldValues, database: u16) -> Result<S> {
        self.runtime.block_on(self.inner.upsert(id, values, database))
    }

    pub fn delete(&self, id: Uuid, database: u16) -> Result<()> {
        self.runtime.block_on(self.inner.delete(id, database))
    }
}
