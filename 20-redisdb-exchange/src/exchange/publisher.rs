use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use super::{Envelope, Identity, Source};
use crate::{
    client::Client,
    clock::Clock,
    error::{Error, Result},
};

/// Publishes envelopes on the exchange channel.
pub struct Publisher {
    identity: Identity,
    channel: String,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    pub fn new(
        identity: Identity,
        channel: impl Into<String>,
        client: Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            channel: channel.into(),
            client,
            clock,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wraps `data` in an envelope stamped with this process and the current
    /// time, and publishes it once.
    ///
    /// Resolves to the number of subscribers that received it. A failed
    /// publish is logged and reported as [`Error::InvalidState`]; it is not
    /// retried.
    pub async fn publish<T>(
        &self,
        source: impl Into<Source>,
        routing_key: &str,
        data: Option<&T>,
    ) -> Result<i64>
    where
        T: Serialize + ?Sized,
    {
        let source = source.into();
        let data = match data.map(serde_json::to_value).transpose() {
            Ok(data) => data.unwrap_or(Value::Null),
            Err(err) => {
                error!(%source, routing_key, error = ?err, "data could not be converted to message");
                return Err(Error::InvalidArgument(format!(
                    "provided data could not be converted to message: {err}"
                )));
            }
        };

        let envelope = Envelope {
            sender_id: Some(self.identity.to_string()),
            source: source.to_string(),
            routing_key: routing_key.to_string(),
            created: Some(self.clock.now().fixed_offset()),
            data,
        };
        envelope.validate()?;
        let payload = serde_json::to_string(&envelope)?;

        match self.client.publish(&self.channel, payload).await {
            Ok(receivers) => {
                debug!(
                    %source,
                    routing_key,
                    data = %envelope.data,
                    receivers,
                    "message was pushed into data exchange"
                );
                Ok(receivers)
            }
            Err(err) => {
                error!(
                    %source,
                    routing_key,
                    data = %envelope.data,
                    error = ?err,
                    "message could not be pushed into data exchange"
                );
                Err(Error::InvalidState(format!(
                    "message could not be published into exchange: {err}"
                )))
            }
        }
    }
}
