#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use redisdb_exchange::{
    Config,
    resp::{Frame, RespCodec},
};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(2);

/// In-process server speaking enough of the protocol for the client, the
/// exchange and the state store.
pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

struct ServerState {
    password: Option<String>,
    databases: Mutex<HashMap<u16, HashMap<String, Bytes>>>,
    subscribers: Mutex<HashMap<String, usize>>,
    bus: broadcast::Sender<(String, Bytes)>,
    log: Mutex<Vec<String>>,
    connections: AtomicUsize,
}

impl FakeServer {
    pub async fn start() -> Result<Self> {
        Self::spawn(None).await
    }

    pub async fn with_password(password: &str) -> Result<Self> {
        Self::spawn(Some(password.to_string())).await
    }

    async fn spawn(password: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (bus, _) = broadcast::channel(256);
        let state = Arc::new(ServerState {
            password,
            databases: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            bus,
            log: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        Ok(Self { addr, state, task })
    }

    pub fn config(&self) -> Config {
        Config {
            port: self.addr.port(),
            connect_timeout: Duration::from_secs(1),
            ..Config::default()
        }
    }

    /// Every command received so far, arguments joined by spaces.
    pub fn commands(&self) -> Vec<String> {
        self.state.log.lock().expect("log lock").clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.split(' ').next() == Some(name))
            .count()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn stored(&self, database: u16, key: &str) -> Option<String> {
        self.state
            .databases
            .lock()
            .expect("databases lock")
            .get(&database)
            .and_then(|keys| keys.get(key))
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    pub fn insert(&self, database: u16, key: &str, value: &str) {
        self.state
            .databases
            .lock()
            .expect("databases lock")
            .entry(database)
            .or_default()
            .insert(key.to_string(), Bytes::copy_from_slice(value.as_bytes()));
    }

    pub fn subscribers(&self, channel: &str) -> usize {
        self.state
            .subscribers
            .lock()
            .expect("subscribers lock")
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    pub async fn wait_for_subscribers(&self, channel: &str, expected: usize) {
        let deadline = Instant::now() + WAIT;
        while self.subscribers(channel) < expected {
            assert!(
                Instant::now() < deadline,
                "no {expected} subscribers on {channel} in time"
            );
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Session {
    database: u16,
    authenticated: bool,
    channels: HashSet<String>,
}

async fn serve(stream: TcpStream, state: Arc<ServerState>) {
    let mut frames = Framed::new(stream, RespCodec);
    let mut bus = state.bus.subscribe();
    let mut session = Session {
        database: 0,
        authenticated: state.password.is_none(),
        channels: HashSet::new(),
    };

    loop {
        select! {
            frame = frames.next() => {
                let Some(Ok(frame)) = frame else { break };
                let reply = execute(&state, &mut session, frame);
                if frames.send(reply).await.is_err() {
                    break;
                }
            }
            published = bus.recv() => {
                let Ok((channel, payload)) = published else { continue };
                if session.channels.contains(&channel) {
                    let push = Frame::Array(Some(vec![
                        Frame::bulk("message"),
                        Frame::bulk(&channel),
                        Frame::Bulk(Some(payload)),
                    ]));
                    if frames.send(push).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    let mut subscribers = state.subscribers.lock().expect("subscribers lock");
    for channel in session.channels {
        if let Some(count) = subscribers.get_mut(&channel) {
            *count = count.saturating_sub(1);
        }
    }
}

fn execute(state: &ServerState, session: &mut Session, frame: Frame) -> Frame {
    let Frame::Array(Some(items)) = frame else {
        return Frame::Error("ERR expected an array of bulk strings".to_string());
    };
    let args: Vec<Bytes> = items
        .into_iter()
        .filter_map(|item| match item {
            Frame::Bulk(Some(data)) => Some(data),
            _ => None,
        })
        .collect();
    let text = |index: usize| {
        args.get(index)
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .unwrap_or_default()
    };

    let name = text(0).to_uppercase();
    let mut logged = vec![name.clone()];
    logged.extend((1..args.len()).map(text));
    state.log.lock().expect("log lock").push(logged.join(" "));

    if name == "AUTH" {
        let supplied = text(args.len().saturating_sub(1));
        return if state.password.as_deref() == Some(supplied.as_str()) {
            session.authenticated = true;
            Frame::ok()
        } else {
            Frame::Error("WRONGPASS invalid username-password pair".to_string())
        };
    }
    if !session.authenticated {
        return Frame::Error("NOAUTH Authentication required.".to_string());
    }

    let mut databases = state.databases.lock().expect("databases lock");
    let keys = databases.entry(session.database).or_default();

    match name.as_str() {
        "PING" => Frame::Simple("PONG".to_string()),
        "SELECT" => match text(1).parse() {
            Ok(database) => {
                session.database = database;
                Frame::ok()
            }
            Err(_) => Frame::Error("ERR invalid DB index".to_string()),
        },
        "GET" => Frame::Bulk(keys.get(&text(1)).cloned()),
        "SET" => {
            keys.insert(text(1), args.get(2).cloned().unwrap_or_default());
            Frame::ok()
        }
        "DEL" => Frame::Integer(i64::from(keys.remove(&text(1)).is_some())),
        "PUBLISH" => {
            let channel = text(1);
            let receivers = state
                .subscribers
                .lock()
                .expect("subscribers lock")
                .get(&channel)
                .copied()
                .unwrap_or(0);
            let _ = state
                .bus
                .send((channel, args.get(2).cloned().unwrap_or_default()));
            Frame::Integer(receivers as i64)
        }
        "SUBSCRIBE" | "UNSUBSCRIBE" => {
            let channel = text(1);
            let mut subscribers = state.subscribers.lock().expect("subscribers lock");
            let count = subscribers.entry(channel.clone()).or_default();
            if name == "SUBSCRIBE" {
                if session.channels.insert(channel.clone()) {
                    *count += 1;
                }
            } else if session.channels.remove(&channel) {
                *count = count.saturating_sub(1);
            }
            Frame::Array(Some(vec![
                Frame::bulk(name.to_lowercase()),
                Frame::bulk(&channel),
                Frame::Integer(session.channels.len() as i64),
            ]))
        }
        _ => Frame::Error(format!("ERR unknown command '{name}'")),
    }
}

/// Waits for the next client event or fails the test.
pub async fn next_event(
    events: &mut broadcast::Receiver<redisdb_exchange::ClientEvent>,
) -> Result<redisdb_exchange::ClientEvent> {
    Ok(timeout(WAIT, events.recv()).await??)
}
