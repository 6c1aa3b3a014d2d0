#![allow(dead_code)]

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use relay_server::{
    Relay,
    change_listener::source::{NotificationSource, NotificationStream},
    config::RelayConfig,
    errors::listener_error::ListenerError,
    metrics::RelayMetrics,
    registry::connection_registry::ConnectionRegistry,
    token_verifier::TokenVerifier,
};
use serde_json::{Value, json};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;

pub const SECRET: &[u8] = b"integration-test-secret";
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Session = mpsc::UnboundedReceiver<String>;

/// Stands in for Postgres: every queued session is one successful subscription.
pub struct ScriptedSource {
    sessions: mpsc::UnboundedReceiver<Session>,
}

pub struct ScriptedStream {
    payloads: Session,
}

impl NotificationSource for ScriptedSource {
    type Stream = ScriptedStream;

    async fn connect(&mut self) -> Result<ScriptedStream, ListenerError> {
        match self.sessions.recv().await {
            Some(payloads) => Ok(ScriptedStream { payloads }),
            None => std::future::pending().await,
        }
    }
}

impl NotificationStream for ScriptedStream {
    async fn next_payload(&mut self) -> Result<String, ListenerError> {
        self.payloads.recv().await.ok_or(ListenerError::ConnectionLost)
    }
}

pub struct Database {
    sessions: mpsc::UnboundedSender<Session>,
    current: Option<mpsc::UnboundedSender<String>>,
}

impl Database {
    pub fn open_session(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.send(rx).unwrap();
        self.current = Some(tx);
    }

    /// Simulates the database connection going away.
    pub fn drop_session(&mut self) {
        self.current = None;
    }

    pub fn notify_raw(&self, payload: &str) {
        self.current
            .as_ref()
            .expect("no open session")
            .send(payload.to_string())
            .unwrap();
    }

    pub fn notify(&self, workspace_id: &str, channel: &str, data: Value) {
        let payload = json!({"channel": channel, "workspace_id": workspace_id, "data": data});
        self.notify_raw(&payload.to_string());
    }
}

pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: Arc<RelayMetrics>,
    pub database: Database,
    pub shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl TestRelay {
    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(15), self.task)
            .await
            .unwrap()
            .unwrap();
    }

    pub fn url(&self, token: &str, workspace_id: &str) -> String {
        format!("ws://{}/?token={token}&workspace={workspace_id}", self.addr)
    }

    pub async fn connect(&self, subject: &str, workspace_id: &str) -> Client {
        connect(&self.url(&token(subject, 3600), workspace_id)).await
    }

    /// Waits until the registry has caught up with a subscribe frame.
    pub async fn wait_for_subscribers(&self, workspace_id: &str, channel: &str, count: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while self.registry.lookup(workspace_id, channel).len() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

pub fn config() -> RelayConfig {
    RelayConfig {
        database_url: "postgres://unused".to_string(),
        notify_channel: "realtime_events".to_string(),
        signing_key: SECRET.to_vec(),
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        queue_capacity: 64,
        overflow_threshold: 8,
        backoff_initial: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        max_connections: 0,
        ping_interval: Duration::from_secs(15),
        idle_timeout: Duration::from_secs(45),
    }
}

pub async fn spawn_relay(configure: impl FnOnce(&mut RelayConfig)) -> TestRelay {
    let mut config = config();
    configure(&mut config);

    let listener = TcpListener::bind((config.bind_address, config.port))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
    let mut database = Database {
        sessions: sessions_tx,
        current: None,
    };
    database.open_session();

    let relay = Relay::new(config);
    let registry = relay.registry();
    let metrics = relay.metrics();
    let shutdown = CancellationToken::new();
    let source = ScriptedSource {
        sessions: sessions_rx,
    };
    let task = tokio::spawn(relay.run(source, listener, shutdown.clone()));

    TestRelay {
        addr,
        registry,
        metrics,
        database,
        shutdown,
        task,
    }
}

pub fn token(subject: &str, expires_in: i64) -> String {
    TokenVerifier::new(SECRET.to_vec())
        .sign(&json!({"sub": subject, "exp": Utc::now().timestamp() + expires_in}))
        .unwrap()
}

pub async fn connect(url: &str) -> Client {
    let (client, _) = tokio::time::timeout(TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .unwrap()
        .unwrap();
    client
}

pub async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next data or close frame, skipping pings and pongs. `None` once the stream ends.
pub async fn next_message(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(message)) => return Some(message),
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .unwrap()
}

pub async fn recv_json(client: &mut Client) -> Value {
    match next_message(client).await {
        Some(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Asserts nothing arrives within `window`.
pub async fn assert_silent(client: &mut Client, window: Duration) {
    if let Ok(message) = tokio::time::timeout(window, client.next()).await {
        panic!("expected silence, got {message:?}");
    }
}

/// Waits for the close frame and returns its code.
pub async fn recv_close_code(client: &mut Client) -> Option<u16> {
    loop {
        match next_message(client).await {
            Some(Message::Close(frame)) => return frame.map(|frame| u16::from(frame.code)),
            Some(_) => continue,
            None => return None,
        }
    }
}

pub async fn connect_and_subscribe(
    relay: &TestRelay,
    subject: &str,
    workspace_id: &str,
    channel: &str,
) -> Client {
    let mut client = relay.connect(subject, workspace_id).await;
    assert_eq!(recv_json(&mut client).await, json!({"type": "connected"}));

    let before = relay.registry.lookup(workspace_id, channel).len();
    send_json(&mut client, json!({"type": "subscribe", "channel": channel})).await;
    relay
        .wait_for_subscribers(workspace_id, channel, before + 1)
        .await;
    client
}
