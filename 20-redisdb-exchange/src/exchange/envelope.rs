use std::{fmt, sync::Arc};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    clock::{deserialize_lenient, serialize_atom},
    error::{Error, Result},
};

/// Wire form of one exchange event.
///
/// `source`, `routing_key` and `data` must be present on input; the sender and
/// creation time are optional there but always written on output. A creation
/// time that does not parse is read as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub sender_id: Option<String>,
    pub source: String,
    pub routing_key: String,
    #[serde(
        default,
        serialize_with = "serialize_atom",
        deserialize_with = "deserialize_lenient"
    )]
    pub created: Option<DateTime<FixedOffset>>,
    pub data: Value,
}

impl Envelope {
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            return Err(Error::InvalidArgument("envelope source is empty".to_string()));
        }
        if self.routing_key.is_empty() {
            return Err(Error::InvalidArgument(
                "envelope routing key is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identifier of this process on the exchange.
///
/// Created once at start-up and handed to both the publisher and the
/// consumer so events published here are not consumed here again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(Arc<str>);

impl Identity {
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
