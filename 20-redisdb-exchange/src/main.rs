use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use redisdb_exchange::{
    cli::{Cli, Command, PublishArgs, StateCommand},
    client::Client,
    clock::SystemClock,
    config::Config,
    exchange::{Exchange, ExchangeConsumer, Identity, JsonDocumentFactory, Publisher, Route, Source},
    state::{StateRecord, StatesManager, StatesRepository},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.connection.config();
    match cli.command {
        Command::Listen => listen(config).await?,
        Command::Publish(args) => publish(config, args).await?,
        Command::State(command) => state(config, command).await?,
    }

    Ok(())
}

async fn listen(config: Config) -> Result<()> {
    let mut consumer = ExchangeConsumer::new(Identity::generate(), JsonDocumentFactory::<Value>::new());
    consumer
        .registry_mut()
        .register_fn(Route::any(), |source, routing_key, data| {
            println!("{source} {routing_key} {data}");
            Ok(())
        });

    let exchange = Exchange::new(config, consumer);
    let stopped = exchange
        .run_until_ctrl_c()
        .await
        .context("exchange listener failed")?;
    info!(?stopped, "listener stopped");
    Ok(())
}

async fn publish(config: Config, args: PublishArgs) -> Result<()> {
    let Some(source) = Source::resolve(&args.source) else {
        bail!("unknown source `{}`", args.source);
    };
    let data = args
        .data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;

    let channel = config.channel.clone();
    let client = connect(config).await?;
    let publisher = Publisher::new(Identity::generate(), channel, client.clone(), Arc::new(SystemClock));

    let receivers = publisher
        .publish(source, &args.routing_key, data.as_ref())
        .await?;
    info!(receivers, "event published");

    client.disconnect();
    Ok(())
}

async fn state(config: Config, command: StateCommand) -> Result<()> {
    let database = config.database;
    let client = connect(config).await?;

    match command {
        StateCommand::Get { id } => {
            let repository = StatesRepository::<_, StateRecord>::new(client.clone());
            match repository.find(id, database).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => warn!(%id, database, "state not found"),
            }
        }
        StateCommand::Delete { id } => {
            StatesManager::<_, StateRecord>::new(client.clone(), Arc::new(SystemClock))
                .delete(id, database)
                .await?;
            info!(%id, database, "state deleted");
        }
    }

    client.disconnect();
    Ok(())
}

async fn connect(config: Config) -> Result<Client> {
    let address = config.address();
    let client = Client::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {address}"))?;
    Ok(client)
}
