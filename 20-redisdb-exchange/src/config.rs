use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub const DEFAULT_CHANNEL: &str = "fb_exchange";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection and exchange settings.
///
/// Every field has a default, so a loader only has to supply what differs
/// from a local server on the standard port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Pub/sub channel carrying exchange envelopes.
    pub channel: String,
    /// Logical database index used when a caller does not pick one.
    pub database: u16,
    #[serde(
        rename = "connect_timeout_ms",
        deserialize_with = "duration_from_millis"
    )]
    pub connect_timeout: Duration,
    /// Capacity of the client event channel before slow observers lag.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            channel: DEFAULT_CHANNEL.to_string(),
            database: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_capacity: 1024,
        }
    }
}

impl Config {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
