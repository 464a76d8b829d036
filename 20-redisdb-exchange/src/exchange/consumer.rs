use std::{marker::PhantomData, ops::ControlFlow, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{Envelope, Identity, Source};
use crate::error::{Error, Result};

/// Turns the `data` of an envelope into a typed document.
pub trait DocumentFactory: Send + Sync {
    type Document: Send + Sync;

    fn create(&self, routing_key: &str, data: &Value) -> Result<Self::Document>;
}

/// Deserializes every payload into `D`, whatever its routing key.
pub struct JsonDocumentFactory<D>(PhantomData<fn() -> D>);

impl<D> JsonDocumentFactory<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<D> Default for JsonDocumentFactory<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> DocumentFactory for JsonDocumentFactory<D>
where
    D: DeserializeOwned + Send + Sync,
{
    type Document = D;

    fn create(&self, _routing_key: &str, data: &Value) -> Result<D> {
        Ok(D::deserialize(data)?)
    }
}

/// Handler for decoded exchange events.
///
/// Returning [`Error::Terminate`] asks the owner of the connection to shut it
/// down; any other error is logged and the event counts as handled.
pub trait Consumer<D>: Send + Sync {
    fn consume(&self, source: Source, routing_key: &str, document: &D) -> Result<()>;
}

struct FnConsumer<F>(F);

impl<D, F> Consumer<D> for FnConsumer<F>
where
    F: Fn(Source, &str, &D) -> Result<()> + Send + Sync,
{
    fn consume(&self, source: Source, routing_key: &str, document: &D) -> Result<()> {
        (self.0)(source, routing_key, document)
    }
}

/// Which events a registered consumer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    source: Option<Source>,
    routing_key: Option<String>,
}

impl Route {
    pub fn new(source: impl Into<Source>, routing_key: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            routing_key: Some(routing_key.into()),
        }
    }

    /// Every routing key published by `source`.
    pub fn source(source: impl Into<Source>) -> Self {
        Self {
            source: Some(source.into()),
            routing_key: None,
        }
    }

    pub fn any() -> Self {
        Self {
            source: None,
            routing_key: None,
        }
    }

    pub fn matches(&self, source: Source, routing_key: &str) -> bool {
        self.source.map_or(true, |expected| expected == source)
            && self
                .routing_key
                .as_deref()
                .map_or(true, |expected| expected == routing_key)
    }
}

pub struct ConsumerRegistry<D> {
    routes: Vec<(Route, Arc<dyn Consumer<D>>)>,
}

impl<D: 'static> ConsumerRegistry<D> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn register(
        &mut self,
        source: impl Into<Source>,
        routing_key: impl Into<String>,
        consumer: impl Consumer<D> + 'static,
    ) -> &mut Self {
        self.route(Route::new(source, routing_key), consumer)
    }

    pub fn register_source(
        &mut self,
        source: impl Into<Source>,
        consumer: impl Consumer<D> + 'static,
    ) -> &mut Self {
        self.route(Route::source(source), consumer)
    }

    pub fn register_all(&mut self, consumer: impl Consumer<D> + 'static) -> &mut Self {
        self.route(Route::any(), consumer)
    }

    /// Registers a closure for `route`.
    pub fn register_fn<F>(&mut self, route: Route, consumer: F) -> &mut Self
    where
        F: Fn(Source, &str, &D) -> Result<()> + Send + Sync + 'static,
    {
        self.route(route, FnConsumer(consumer))
    }

    pub fn route(&mut self, route: Route, consumer: impl Consumer<D> + 'static) -> &mut Self {
        self.routes.push((route, Arc::new(consumer)));
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Hands the document to every matching consumer in registration order.
    ///
    /// Continues with the number of consumers invoked, or breaks with the
    /// reason of the first termination request.
    pub fn dispatch(&self, source: Source, routing_key: &str, document: &D) -> ControlFlow<String, usize> {
        let mut invoked = 0;
        for (_, consumer) in self
            .routes
            .iter()
            .filter(|(route, _)| route.matches(source, routing_key))
        {
            invoked += 1;
            match consumer.consume(source, routing_key, document) {
                Ok(()) => {}
                Err(Error::Terminate(reason)) => return ControlFlow::Break(reason),
                Err(err) => {
                    warn!(%source, routing_key, error = ?err, "consumer failed to handle event");
                }
            }
        }
        ControlFlow::Continue(invoked)
    }
}

impl<D: 'static> Default for ConsumerRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one pushed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// Number of consumers the event was handed to.
    Dispatched(usize),
    Dropped(DropReason),
    /// A consumer asked for the connection to be shut down.
    Terminate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not JSON, or a required envelope key is missing or empty.
    Malformed,
    /// Published by this process.
    SelfEcho,
    UnknownSource,
    /// The document factory rejected the data.
    Undecodable,
}

/// Decodes pushed payloads and routes them to registered consumers.
pub struct ExchangeConsumer<F: DocumentFactory> {
    identity: Identity,
    factory: F,
    registry: ConsumerRegistry<F::Document>,
}

impl<F> ExchangeConsumer<F>
where
    F: DocumentFactory,
    F::Document: 'static,
{
    pub fn new(identity: Identity, factory: F) -> Self {
        Self {
            identity,
            factory,
            registry: ConsumerRegistry::new(),
        }
    }

    pub fn with_registry(mut self, registry: ConsumerRegistry<F::Document>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut ConsumerRegistry<F::Document> {
        &mut self.registry
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Handles one payload pushed on the exchange channel. Never fails; bad
    /// input is logged and dropped.
    pub fn consume(&self, payload: &[u8]) -> Consumed {
        debug!(bytes = payload.len(), "handling exchange message");
        let consumed = self.handle(payload);
        debug!(outcome = ?consumed, "exchange message handled");
        consumed
    }

    fn handle(&self, payload: &[u8]) -> Consumed {
        let envelope = match serde_json::from_slice::<Envelope>(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "received message is not a valid exchange envelope");
                return Consumed::Dropped(DropReason::Malformed);
            }
        };
        if let Err(err) = envelope.validate() {
            warn!(error = %err, "received message is not a valid exchange envelope");
            return Consumed::Dropped(DropReason::Malformed);
        }

        if envelope.sender_id.as_deref() == Some(self.identity.as_str()) {
            return Consumed::Dropped(DropReason::SelfEcho);
        }

        let Some(source) = Source::resolve(&envelope.source) else {
            debug!(source = %envelope.source, "event from unknown source ignored");
            return Consumed::Dropped(DropReason::UnknownSource);
        };

        let document = match self.factory.create(&envelope.routing_key, &envelope.data) {
            Ok(document) => document,
            Err(err) => {
                error!(
                    %source,
                    routing_key = %envelope.routing_key,
                    data = %envelope.data,
                    error = ?err,
                    "message could not be transformed into a document"
                );
                return Consumed::Dropped(DropReason::Undecodable);
            }
        };

        match self.registry.dispatch(source, &envelope.routing_key, &document) {
            ControlFlow::Continue(invoked) => Consumed::Dispatched(invoked),
            ControlFlow::Break(reason) => Consumed::Terminate(reason),
        }
    }
}
