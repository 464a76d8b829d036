//! Event exchange and keyed state store on top of one Redis connection.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`resp`] holds the wire frames and the codec that reads and writes them.
//! - [`client`] owns a connection, pipelines commands and matches replies in
//!   order, and forwards pub/sub pushes as [`client::ClientEvent`]s.
//! - [`blocking`] runs the same client to completion on the calling thread.
//! - [`exchange`] publishes and consumes JSON envelopes on a shared channel.
//! - [`state`] stores JSON documents keyed by UUID, writing only on change.
//! - [`kv`] is the key/value surface the state store is written against.
//! - [`config`], [`clock`] and [`error`] are shared plumbing; [`cli`] parses
//!   the command line of the `redisdb-exchange` binary.
//!
//! Unit tests sit next to the code. Integration tests under `tests/` run the
//! client against an in-process server.

pub mod blocking;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod kv;
pub mod resp;
pub mod state;

pub use client::{Client, ClientEvent, ConnectionState};
pub use config::Config;
pub use error::{Error, Result};
