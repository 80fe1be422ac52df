#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use realtime_api::config::Config;
use realtime_api::directory::MemoryDirectory;
use realtime_api::AppState;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_SECRET: &str = "test-internal-secret";

pub fn test_config() -> Config {
    Config {
        port: 0,
        redis_url: "redis://127.0.0.1:6379".to_string(),
        server_api_url: "http://127.0.0.1:4000/api/v1".to_string(),
        internal_secret: TEST_SECRET.to_string(),
        call_sweep_interval: Duration::from_secs(10),
        heartbeat_timeout: Duration::from_secs(90),
        outbound_queue_capacity: 64,
        backend_timeout: Duration::from_secs(2),
    }
}

/// Build a test AppState backed by an in-memory directory.
pub fn test_state_with(config: Config) -> (AppState, Arc<MemoryDirectory>) {
    let directory = Arc::new(MemoryDirectory::new());
    let state = AppState::new(config, directory.clone());
    (state, directory)
}

pub fn test_state() -> (AppState, Arc<MemoryDirectory>) {
    test_state_with(test_config())
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Arc<MemoryDirectory>) {
    let (state, directory) = test_state();
    let app = realtime_api::routes::router().with_state(state.clone());
    (app, state, directory)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_ws_server_with(config: Config) -> (SocketAddr, AppState, Arc<MemoryDirectory>) {
    let (state, directory) = test_state_with(config);
    let app = realtime_api::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, directory)
}

pub async fn start_ws_server() -> (SocketAddr, AppState, Arc<MemoryDirectory>) {
    start_ws_server_with(test_config()).await
}

/// Open a gateway connection carrying the identity headers the auth layer
/// would normally set.
pub async fn connect_as(addr: SocketAddr, user_id: Option<&str>, name: Option<&str>) -> Ws {
    let mut request = format!("ws://{addr}/gateway")
        .into_client_request()
        .expect("ws request");
    if let Some(user_id) = user_id {
        request
            .headers_mut()
            .insert("x-user-id", http::HeaderValue::from_str(user_id).unwrap());
    }
    if let Some(name) = name {
        request
            .headers_mut()
            .insert("x-user-name", http::HeaderValue::from_str(name).unwrap());
    }
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("ws connect");
    ws
}

/// Connect and wait until the server has finished the connect hooks for this
/// user (presence registered and `groups` conversation groups joined).
pub async fn connect_user(
    addr: SocketAddr,
    state: &AppState,
    user_id: &str,
    name: &str,
    groups: &[&str],
) -> Ws {
    let before = state.presence.lookup(user_id).len();
    let ws = connect_as(addr, Some(user_id), Some(name)).await;
    wait_for(|| state.presence.lookup(user_id).len() > before).await;
    for group in groups {
        wait_for(|| {
            state
                .presence
                .lookup(user_id)
                .iter()
                .all(|conn| state.groups.is_member(group, conn))
        })
        .await;
    }
    ws
}

pub async fn send_event(ws: &mut Ws, event: &str, data: Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .expect("send event");
}

/// Read the next server event, failing after 5 seconds.
pub async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("ws read error");
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("parse event");
        }
    }
}

/// Skip events until one named `event` arrives.
pub async fn next_event_named(ws: &mut Ws, event: &str) -> Value {
    loop {
        let msg = next_event(ws).await;
        if msg["event"] == event {
            return msg;
        }
    }
}

/// Assert that nothing arrives within a short window.
pub async fn expect_silence(ws: &mut Ws) {
    if let Ok(Some(Ok(tungstenite::Message::Text(text)))) =
        time::timeout(Duration::from_millis(200), ws.next()).await
    {
        panic!("unexpected event: {}", text.as_str());
    }
}

/// Wait for the next close frame and return its code.
pub async fn close_code(ws: &mut Ws) -> u16 {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended")
            .expect("ws read error");
        if let tungstenite::Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

/// Poll `cond` until it holds, failing after 2 seconds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(time::Instant::now() < deadline, "condition not met in time");
        time::sleep(Duration::from_millis(10)).await;
    }
}
