use std::future::Future;

use tokio::{select, sync::broadcast::error::RecvError};
use tracing::{info, warn};

use super::{Consumed, DocumentFactory, ExchangeConsumer};
use crate::{
    client::{Client, ClientEvent},
    config::Config,
    error::Result,
};

/// Why [`Exchange::run_until`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stopped {
    Shutdown,
    /// A consumer requested termination; the connection was closed gracefully.
    Terminated(String),
    ConnectionClosed,
}

/// Subscriber loop feeding the exchange channel into a consumer.
///
/// Owns its own connection: a subscribed connection only receives pushes, so
/// publishing goes through a separate [`Client`].
pub struct Exchange<F: DocumentFactory> {
    client: Client,
    channel: String,
    consumer: ExchangeConsumer<F>,
}

impl<F> Exchange<F>
where
    F: DocumentFactory,
    F::Document: 'static,
{
    pub fn new(config: Config, consumer: ExchangeConsumer<F>) -> Self {
        let channel = config.channel.clone();
        Self {
            client: Client::new(config),
            channel,
            consumer,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn run(&self) -> Result<Stopped> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until_ctrl_c(&self) -> Result<Stopped> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Connects, subscribes and consumes until `shutdown` resolves, a consumer
    /// asks to terminate or the connection goes away.
    pub async fn run_until<S>(&self, shutdown: S) -> Result<Stopped>
    where
        S: Future<Output = ()>,
    {
        // Subscribe first so no push between SUBSCRIBE and the loop is missed.
        let mut events = self.client.events();
        self.client.connect().await?;
        if let Err(err) = self.client.subscribe(&self.channel).await {
            self.client.close();
            return Err(err);
        }
        info!(channel = %self.channel, "listening for exchange events");

        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("exchange shutting down");
                    self.client.disconnect();
                    return Ok(Stopped::Shutdown);
                }
                event = events.recv() => match event {
                    Ok(ClientEvent::Message { channel, payload }) if channel == self.channel => {
                        if let Consumed::Terminate(reason) = self.consumer.consume(&payload) {
                            info!(%reason, "consumer requested termination");
                            self.client.disconnect();
                            return Ok(Stopped::Terminated(reason));
                        }
                    }
                    Ok(ClientEvent::Closed) | Err(RecvError::Closed) => {
                        warn!("exchange connection closed");
                        return Ok(Stopped::ConnectionClosed);
                    }
                    Ok(ClientEvent::Error(message)) => {
                        warn!(%message, "exchange connection reported an error");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "exchange consumer lagged behind, events were dropped");
                    }
                },
            }
        }
    }
}
