mod common;

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use redisdb_exchange::{Client, ClientEvent, Config, ConnectionState, Error};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    time::timeout,
};

use common::{FakeServer, next_event};

#[tokio::test]
async fn commands_round_trip_per_database() -> Result<()> {
    let server = FakeServer::start().await?;
    let client = Client::new(server.config());
    client.connect().await?;

    assert_eq!(client.ping().await?, "PONG");

    client.select(1).await?;
    assert!(client.set("key", "one").await?);
    client.select(2).await?;
    assert_eq!(client.get("key").await?, None);
    assert!(client.set("key", "two").await?);

    client.select(1).await?;
    assert_eq!(client.get("key").await?, Some("one".to_string()));
    assert_eq!(client.del("key").await?, 1);
    assert_eq!(client.del("key").await?, 0);

    assert_eq!(server.stored(2, "key").as_deref(), Some("two"));
    assert!(matches!(
        client.command(redisdb_exchange::resp::Command::new("FLUSHALL")).await,
        Err(Error::Reply(message)) if message.starts_with("ERR unknown command")
    ));

    client.close();
    Ok(())
}

#[tokio::test]
async fn subscribers_receive_published_messages() -> Result<()> {
    let server = FakeServer::start().await?;
    let subscriber = Client::new(server.config());
    let publisher = Client::new(server.config());
    subscriber.connect().await?;
    publisher.connect().await?;

    let mut events = subscriber.events();
    subscriber.subscribe("fb_exchange").await?;

    assert_eq!(publisher.publish("fb_exchange", r#"{"a":1}"#).await?, 1);
    assert_eq!(publisher.publish("other", "ignored").await?, 0);

    assert_eq!(
        next_event(&mut events).await?,
        ClientEvent::Message {
            channel: "fb_exchange".to_string(),
            payload: Bytes::from_static(br#"{"a":1}"#),
        }
    );

    subscriber.unsubscribe("fb_exchange").await?;
    assert_eq!(publisher.publish("fb_exchange", "late").await?, 0);
    Ok(())
}

#[tokio::test]
async fn second_connect_leaves_the_server_untouched() -> Result<()> {
    let server = FakeServer::start().await?;
    let client = Client::new(server.config());
    client.connect().await?;
    client.ping().await?;

    assert!(matches!(client.connect().await, Err(Error::AlreadyConnected)));
    client.ping().await?;
    assert_eq!(server.connections(), 1);
    assert!(client.is_connected());
    Ok(())
}

#[tokio::test]
async fn failed_connect_can_be_retried() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let client = Client::new(Config {
        port,
        connect_timeout: Duration::from_millis(500),
        ..Config::default()
    });
    assert!(matches!(client.connect().await, Err(Error::Connection(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let server = FakeServer::start().await?;
    let client = Client::new(server.config());
    client.connect().await?;
    client.close();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // Reconnecting after a close is explicit.
    client.connect().await?;
    assert_eq!(client.ping().await?, "PONG");
    assert_eq!(server.connections(), 2);
    Ok(())
}

#[tokio::test]
async fn connect_gives_up_after_the_timeout() -> Result<()> {
    // A listener that never accepts: once its accept queue is full, further
    // handshakes stall instead of being refused.
    let socket = TcpSocket::new_v4()?;
    socket.bind("127.0.0.1:0".parse()?)?;
    let listener = socket.listen(1)?;
    let addr = listener.local_addr()?;
    let mut queued = Vec::new();
    for _ in 0..16 {
        match timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => queued.push(stream),
            _ => break,
        }
    }

    let client = Client::new(Config {
        port: addr.port(),
        connect_timeout: Duration::from_millis(200),
        ..Config::default()
    });
    assert!(matches!(
        client.connect().await,
        Err(Error::Connection(message)) if message.contains("timed out")
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The attempt was released, so the next one is not refused as a duplicate.
    assert!(matches!(client.connect().await, Err(Error::Connection(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    drop(queued);
    Ok(())
}

#[tokio::test]
async fn password_is_sent_on_connect() -> Result<()> {
    let server = FakeServer::with_password("secret").await?;

    let client = Client::new(Config {
        username: Some("default".to_string()),
        password: Some("secret".to_string()),
        ..server.config()
    });
    client.connect().await?;
    assert_eq!(client.ping().await?, "PONG");
    assert_eq!(server.commands()[0], "AUTH default secret");

    let rejected = Client::new(Config {
        password: Some("wrong".to_string()),
        ..server.config()
    });
    assert!(matches!(rejected.connect().await, Err(Error::Connection(_))));
    assert_eq!(rejected.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn idle_disconnect_closes_immediately() -> Result<()> {
    let server = FakeServer::start().await?;
    let client = Client::new(server.config());
    client.connect().await?;
    let mut events = client.events();

    client.disconnect();
    assert_eq!(next_event(&mut events).await?, ClientEvent::Closed);
    assert!(matches!(client.ping().await, Err(Error::ConnectionClosed)));
    drop(server);
    Ok(())
}
