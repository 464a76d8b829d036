use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    client::Client,
    error::Result,
    resp::{Command, Frame},
};

/// The key/value surface the state store needs from a connection.
///
/// Every operation names its database; implementations must select it and
/// run the command without letting another caller's command in between.
/// Implemented by [`Client`]; tests swap in recording doubles.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, database: u16, key: &str) -> Result<Option<String>>;

    /// Returns `true` when the write was acknowledged.
    async fn set(&self, database: u16, key: &str, value: &str) -> Result<bool>;

    /// Returns `true` when a key was removed.
    async fn del(&self, database: u16, key: &str) -> Result<bool>;
}

#[async_trait]
impl KvClient for Client {
    async fn get(&self, database: u16, key: &str) -> Result<Option<String>> {
        self.command_in(database, Command::new("GET").arg(key))
            .await?
            .into_optional_string()
    }

    async fn set(&self, database: u16, key: &str, value: &str) -> Result<bool> {
        let reply = self
            .command_in(database, Command::new("SET").arg(key).arg(value))
            .await?;
        Ok(reply.is_ok())
    }

    async fn del(&self, database: u16, key: &str) -> Result<bool> {
        let removed = self
            .command_in(database, Command::new("DEL").arg(key))
            .await
            .and_then(Frame::into_integer)?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl<T: KvClient + ?Sized> KvClient for Arc<T> {
    async fn get(&self, database: u16, key: &str) -> Result<Option<String>> {
        (**self).get(database, key).await
    }

    async fn set(&self, database: u16, key: &str, value: &str) -> Result<bool> {
        (**self).set(database, key, value).await
    }

    async fn del(&self, database: u16, key: &str) -> Result<bool> {
        (**self).del(database, key).await
    }
}
