//! Event exchange over a pub/sub channel.
//!
//! Events travel as JSON [`Envelope`]s. A [`Publisher`] stamps them with this
//! process's [`Identity`] so the [`ExchangeConsumer`] on the same process can
//! skip its own events. The consumer resolves the [`Source`], decodes `data`
//! through a [`DocumentFactory`] and routes the document to the consumers
//! registered for it. [`Exchange`] wires a consumer to a subscribed
//! connection.

mod consumer;
mod envelope;
mod publisher;
mod runner;
mod source;

pub use consumer::{
    Consumed, Consumer, ConsumerRegistry, DocumentFactory, DropReason, ExchangeConsumer,
    JsonDocumentFactory, Route,
};
pub use envelope::{Envelope, Identity};
pub use publisher::Publisher;
pub use runner::{Exchange, Stopped};
pub use source::{Addon, Automator, Bridge, Connector, Module, Plugin, Source};
