use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::config::{Config, DEFAULT_CHANNEL};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print every event published on the exchange channel.
    Listen,
    /// Publish one event on the exchange channel.
    Publish(PublishArgs),
    /// Inspect or remove stored states.
    #[command(subcommand)]
    State(StateCommand),
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Host of the Redis server.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, global = true, default_value_t = 6379)]
    pub port: u16,

    #[arg(long, global = true)]
    pub username: Option<String>,

    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Pub/sub channel carrying exchange events.
    #[arg(long, global = true, default_value = DEFAULT_CHANNEL)]
    pub channel: String,

    /// Logical database holding states.
    #[arg(long, global = true, default_value_t = 0)]
    pub database: u16,
}

impl ConnectionArgs {
    pub fn config(&self) -> Config {
        Config {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            channel: self.channel.clone(),
            database: self.database,
            ..Config::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Source the event is published as, e.g. `devices` or `shelly`.
    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub routing_key: String,

    /// JSON payload; omitted means `null`.
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    /// Print a stored state as JSON.
    Get { id: Uuid },
    /// Remove a stored state.
    Delete { id: Uuid },
}
