//! Asynchronous wire client.
//!
//! A [`Client`] owns one connection. Commands are written in call order and
//! every non-push reply resolves the oldest outstanding request; the server
//! answers in request order, so this FIFO queue is the only correlation
//! mechanism and there are no request ids. Pub/sub pushes (`message` and
//! `pmessage`) never touch the queue and are forwarded to [`ClientEvent`]
//! observers instead.
//!
//! Command methods enqueue eagerly and return a future for the reply, so
//! issuing several commands back to back pipelines them in that order even if
//! the futures are awaited later or in another order. There is no per-command
//! timeout and no cancellation; only [`Client::close`] clears outstanding
//! requests. Reconnecting after a close is up to the owner.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{Error, Result},
    resp::{Command, Frame, RespCodec},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Draining outstanding replies before a graceful close.
    Closing,
}

/// Notifications delivered to every observer of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message {
        channel: String,
        payload: Bytes,
    },
    PatternMessage {
        pattern: String,
        channel: String,
        payload: Bytes,
    },
    /// Sent once each time an open connection is torn down.
    Closed,
    Error(String),
}

type Reply = Result<Frame>;

/// Cheap to clone; every clone drives the same connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    config: Config,
    events: broadcast::Sender<ClientEvent>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    // Bumped on every attach so tasks of an earlier connection cannot touch the current one.
    epoch: u64,
    pending: VecDeque<oneshot::Sender<Reply>>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                events,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    pending: VecDeque::new(),
                    outbound: None,
                    tasks: Vec::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of requests still waiting for their reply.
    pub fn pending_requests(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Subscribes to pushes, close and error notifications.
    ///
    /// Only events sent after this call are observed.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Opens the TCP transport, bounded by the configured connect timeout.
    ///
    /// Fails with [`Error::AlreadyConnected`] without touching the network if
    /// the client is connected or a connect is already in flight.
    pub async fn connect(&self) -> Result<()> {
        let attempt = ConnectAttempt::begin(&self.shared)?;
        let address = self.shared.config.address();
        let limit = self.shared.config.connect_timeout;

        let stream = match timeout(limit, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                warn!(%address, error = %err, "failed to connect");
                return Err(Error::Connection(format!(
                    "failed to connect to {address}: {err}"
                )));
            }
            Err(_) => {
                warn!(%address, ?limit, "connect timed out");
                return Err(Error::Connection(format!(
                    "connection to {address} timed out after {limit:?}"
                )));
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "failed to disable Nagle's algorithm");
        }

        attempt.attach(stream);
        info!(%address, "connected");
        self.authenticate().await
    }

    /// Runs the client over an already opened transport.
    pub async fn connect_with<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ConnectAttempt::begin(&self.shared)?.attach(stream);
        self.authenticate().await
    }

    /// Tears the connection down immediately.
    ///
    /// A no-op unless connected. Observers receive [`ClientEvent::Closed`] once
    /// and every outstanding request fails with [`Error::ConnectionClosing`].
    pub fn close(&self) {
        self.shared.shutdown(None);
    }

    /// Closes once every outstanding reply has arrived.
    ///
    /// New commands are refused from this point on.
    pub fn disconnect(&self) {
        let pending = {
            let mut inner = self.shared.lock();
            if inner.state != ConnectionState::Connected {
                return;
            }
            inner.state = ConnectionState::Closing;
            inner.pending.len()
        };

        if pending == 0 {
            self.shared.shutdown(None);
        } else {
            debug!(pending, "disconnect deferred until outstanding replies arrive");
        }
    }

    /// Sends any command and resolves with its correlated reply.
    ///
    /// The command is queued before this returns; the returned future only
    /// waits for the reply. Error replies resolve to [`Error::Reply`].
    pub fn command(&self, command: Command) -> impl Future<Output = Result<Frame>> + Send + 'static {
        let queued = self.shared.enqueue(command);
        async move { queued?.await.unwrap_or(Err(Error::ConnectionClosing)) }
    }

    /// Sends `command` against `database` and resolves with its reply.
    ///
    /// `SELECT` and the command are queued under one lock, so commands from
    /// other callers sharing this client cannot land between them.
    pub fn command_in(
        &self,
        database: u16,
        command: Command,
    ) -> impl Future<Output = Result<Frame>> + Send + 'static {
        let queued = self.shared.enqueue_pair(select_command(database), command);
        async move {
            let (selected, reply) = queued?;
            expect_ok("SELECT")(selected.await.unwrap_or(Err(Error::ConnectionClosing))?)?;
            reply.await.unwrap_or(Err(Error::ConnectionClosing))
        }
    }

    fn call<T, F>(&self, command: Command, convert: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(Frame) -> Result<T> + Send + 'static,
    {
        let reply = self.command(command);
        async move { convert(reply.await?) }
    }

    pub fn ping(&self) -> impl Future<Output = Result<String>> + Send + 'static {
        self.call(Command::new("PING"), |frame| {
            frame
                .as_text()
                .map(str::to_owned)
                .ok_or_else(|| Error::Protocol(format!("unexpected PING reply {frame:?}")))
        })
    }

    pub fn select(&self, database: u16) -> impl Future<Output = Result<()>> + Send + 'static {
        self.call(select_command(database), expect_ok("SELECT"))
    }

    pub fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send + 'static {
        self.call(Command::new("GET").arg(key), Frame::into_optional_string)
    }

    /// Resolves to `true` when the server acknowledged the write with `OK`.
    pub fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<bool>> + Send + 'static {
        self.call(Command::new("SET").arg(key).arg(value), |frame| {
            Ok(frame.is_ok())
        })
    }

    /// Resolves to the number of keys removed.
    pub fn del(&self, key: &str) -> impl Future<Output = Result<i64>> + Send + 'static {
        self.call(Command::new("DEL").arg(key), Frame::into_integer)
    }

    /// Resolves to the number of subscribers that received the payload.
    pub fn publish(
        &self,
        channel: &str,
        payload: impl AsRef<[u8]>,
    ) -> impl Future<Output = Result<i64>> + Send + 'static {
        self.call(
            Command::new("PUBLISH").arg(channel).arg(payload),
            Frame::into_integer,
        )
    }

    pub fn subscribe(&self, channel: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        self.call(
            Command::new("SUBSCRIBE").arg(channel),
            confirmation("subscribe"),
        )
    }

    pub fn unsubscribe(&self, channel: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        self.call(
            Command::new("UNSUBSCRIBE").arg(channel),
            confirmation("unsubscribe"),
        )
    }

    pub fn psubscribe(&self, pattern: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        self.call(
            Command::new("PSUBSCRIBE").arg(pattern),
            confirmation("psubscribe"),
        )
    }

    pub fn punsubscribe(&self, pattern: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        self.call(
            Command::new("PUNSUBSCRIBE").arg(pattern),
            confirmation("punsubscribe"),
        )
    }

    async fn authenticate(&self) -> Result<()> {
        let Some(password) = self.shared.config.password.as_deref() else {
            return Ok(());
        };

        let mut command = Command::new("AUTH");
        if let Some(username) = self.shared.config.username.as_deref() {
            command = command.arg(username);
        }

        match self.command(command.arg(password)).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "authentication rejected");
                self.close();
                Err(Error::Connection(format!("authentication failed: {err}")))
            }
        }
    }
}

fn select_command(database: u16) -> Command {
    Command::new("SELECT").arg(database.to_string())
}

fn expect_ok(command: &'static str) -> impl FnOnce(Frame) -> Result<()> + Send + 'static {
    move |frame| {
        if frame.is_ok() {
            Ok(())
        } else {
            Err(Error::Protocol(format!("unexpected {command} reply {frame:?}")))
        }
    }
}

/// Subscription replies are `[kind, channel, count]` arrays.
fn confirmation(kind: &'static str) -> impl FnOnce(Frame) -> Result<()> + Send + 'static {
    move |frame| match &frame {
        Frame::Array(Some(items)) if items.first().and_then(Frame::as_text) == Some(kind) => Ok(()),
        _ => Err(Error::Protocol(format!(
            "unexpected {kind} confirmation {frame:?}"
        ))),
    }
}

/// Guards the `Connecting` state so a failed or dropped connect leaves the
/// client `Disconnected`.
struct ConnectAttempt<'a> {
    shared: &'a Arc<Shared>,
    attached: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(shared: &'a Arc<Shared>) -> Result<Self> {
        let mut inner = shared.lock();
        if inner.state != ConnectionState::Disconnected {
            warn!(state = ?inner.state, "connect called on a client that is not disconnected");
            return Err(Error::AlreadyConnected);
        }
        inner.state = ConnectionState::Connecting;
        Ok(Self {
            shared,
            attached: false,
        })
    }

    fn attach<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut inner = self.shared.lock();
        inner.epoch += 1;
        let epoch = inner.epoch;
        let weak = Arc::downgrade(self.shared);
        inner.tasks = vec![
            tokio::spawn(read_loop(
                weak.clone(),
                epoch,
                FramedRead::new(reader, RespCodec),
            )),
            tokio::spawn(write_loop(
                weak,
                epoch,
                FramedWrite::new(writer, RespCodec),
                outbound_rx,
            )),
        ];
        inner.outbound = Some(outbound_tx);
        inner.pending.clear();
        inner.state = ConnectionState::Connected;
        drop(inner);

        self.attached = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.attached {
            return;
        }
        let mut inner = self.shared.lock();
        if inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Disconnected;
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ClientEvent) {
        // No observers is fine.
        let _ = self.events.send(event);
    }

    fn enqueue(&self, command: Command) -> Result<oneshot::Receiver<Reply>> {
        let mut inner = self.lock();
        Self::queue(&mut inner, command)
    }

    fn enqueue_pair(
        &self,
        first: Command,
        second: Command,
    ) -> Result<(oneshot::Receiver<Reply>, oneshot::Receiver<Reply>)> {
        let mut inner = self.lock();
        let first = Self::queue(&mut inner, first)?;
        let second = Self::queue(&mut inner, second)?;
        Ok((first, second))
    }

    fn queue(inner: &mut Inner, command: Command) -> Result<oneshot::Receiver<Reply>> {
        if inner.state != ConnectionState::Connected {
            debug!(command = %command.name(), state = ?inner.state, "refusing command");
            return Err(Error::ConnectionClosed);
        }

        // Queue and write under one lock so request order equals reply order.
        let outbound = inner.outbound.as_ref().ok_or(Error::ConnectionClosed)?;
        outbound
            .send(command.into())
            .map_err(|_| Error::ConnectionClosed)?;

        let (responder, reply) = oneshot::channel();
        inner.pending.push_back(responder);
        Ok(reply)
    }

    fn dispatch(&self, epoch: u64, frame: Frame) -> Result<()> {
        if let Some(event) = push_event(&frame)? {
            self.emit(event);
            return Ok(());
        }

        let (responder, drained) = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return Ok(());
            }
            let responder = inner.pending.pop_front();
            let drained = inner.state == ConnectionState::Closing && inner.pending.is_empty();
            (responder, drained)
        };

        let Some(responder) = responder else {
            return Err(Error::Connection(
                "unexpected reply received, no matching request found".to_string(),
            ));
        };

        let reply = match frame {
            Frame::Error(message) => Err(Error::Reply(message)),
            frame => Ok(frame),
        };
        // The caller may have dropped its future; the reply is consumed either way.
        let _ = responder.send(reply);

        if drained {
            self.shutdown(Some(epoch));
        }
        Ok(())
    }

    fn shutdown(&self, epoch: Option<u64>) {
        let (pending, tasks) = {
            let mut inner = self.lock();
            if epoch.is_some_and(|epoch| epoch != inner.epoch) {
                return;
            }
            if !matches!(
                inner.state,
                ConnectionState::Connected | ConnectionState::Closing
            ) {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            inner.outbound = None;
            (
                std::mem::take(&mut inner.pending),
                std::mem::take(&mut inner.tasks),
            )
        };

        for task in tasks {
            task.abort();
        }
        debug!(rejected = pending.len(), "connection closed");
        self.emit(ClientEvent::Closed);

        for responder in pending {
            let _ = responder.send(Err(Error::ConnectionClosing));
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in inner.tasks.drain(..) {
            task.abort();
        }
    }
}

fn push_event(frame: &Frame) -> Result<Option<ClientEvent>> {
    let Frame::Array(Some(items)) = frame else {
        return Ok(None);
    };

    match items.first().and_then(Frame::as_text) {
        Some("message") => match items.as_slice() {
            [_, channel, payload] => Ok(Some(ClientEvent::Message {
                channel: push_text(channel)?,
                payload: push_payload(payload)?,
            })),
            _ => Err(Error::Protocol(
                "received message push in invalid format".to_string(),
            )),
        },
        Some("pmessage") => match items.as_slice() {
            [_, pattern, channel, payload] => Ok(Some(ClientEvent::PatternMessage {
                pattern: push_text(pattern)?,
                channel: push_text(channel)?,
                payload: push_payload(payload)?,
            })),
            _ => Err(Error::Protocol(
                "received pmessage push in invalid format".to_string(),
            )),
        },
        _ => Ok(None),
    }
}

fn push_text(frame: &Frame) -> Result<String> {
    frame
        .as_text()
        .map(str::to_owned)
        .ok_or_else(|| Error::Protocol(format!("invalid push field {frame:?}")))
}

fn push_payload(frame: &Frame) -> Result<Bytes> {
    match frame {
        Frame::Bulk(Some(data)) => Ok(data.clone()),
        Frame::Simple(text) => Ok(Bytes::from(text.clone())),
        other => Err(Error::Protocol(format!("invalid push payload {other:?}"))),
    }
}

async fn read_loop<R>(shared: Weak<Shared>, epoch: u64, mut frames: FramedRead<R, RespCodec>)
where
    R: AsyncRead + Unpin,
{
    while let Some(decoded) = frames.next().await {
        let Some(client) = shared.upgrade() else {
            return;
        };
        if let Err(err) = decoded.and_then(|frame| client.dispatch(epoch, frame)) {
            error!(error = %err, "closing connection");
            client.emit(ClientEvent::Error(err.to_string()));
            client.shutdown(Some(epoch));
            return;
        }
    }

    if let Some(client) = shared.upgrade() {
        debug!("server closed the connection");
        client.shutdown(Some(epoch));
    }
}

async fn write_loop<W>(
    shared: Weak<Shared>,
    epoch: u64,
    mut sink: FramedWrite<W, RespCodec>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        // Everything already queued goes out with a single flush.
        let mut written = sink.feed(frame).await;
        while written.is_ok() {
            match outbound.try_recv() {
                Ok(next) => written = sink.feed(next).await,
                Err(_) => break,
            }
        }
        let written = match written {
            Ok(()) => sink.flush().await,
            err => err,
        };

        if let Err(err) = written {
            if let Some(client) = shared.upgrade() {
                warn!(error = %err, "failed to write to the connection");
                client.emit(ClientEvent::Error(err.to_string()));
                client.shutdown(Some(epoch));
            }
            return;
        }
    }

    // The sender side is gone, the connection is being closed.
    let _ = sink.close().await;
}
