//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use realtime_common::id::connection_id;

use crate::AppState;

use super::events::{ClientMessage, GatewayMessage, InboundEvent};
use super::handler::handle_event;
use super::lifecycle;
use super::session::{ConnectionSession, Identity};

/// Close codes (4000-range for application-level).
pub const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let identity = Identity::from_headers(&headers);
    ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Option<Identity>) {
    let (mut ws_tx, ws_rx) = socket.split();

    let Some(identity) = identity else {
        tracing::debug!("connection without identity rejected");
        let _ = send_close(&mut ws_tx, CLOSE_NOT_AUTHENTICATED, "Not authenticated").await;
        return;
    };

    let session = Arc::new(ConnectionSession::new(connection_id(), identity));
    let outbound_rx = lifecycle::on_connect(&state, &session).await;

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway connection established"
    );

    run_session(&state, &session, ws_tx, ws_rx, outbound_rx).await;

    lifecycle::on_disconnect(&state, &session).await;

    tracing::info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "gateway connection closed"
    );
}

/// Main event loop: read client events in order, drain the outbound queue,
/// close the socket when it has been silent too long.
async fn run_session(
    state: &AppState,
    session: &ConnectionSession,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<Arc<GatewayMessage>>,
) {
    let heartbeat_timeout = state.config.heartbeat_timeout;
    let mut heartbeat_timer = time::interval((heartbeat_timeout / 2).max(Duration::from_millis(100)));
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.touch();
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                tracing::warn!(connection_id = %session.connection_id, ?e, "invalid frame");
                                continue;
                            }
                        };
                        match InboundEvent::from_client(client_msg) {
                            Ok(event) => handle_event(state, session, event).await,
                            Err(e) => tracing::warn!(
                                connection_id = %session.connection_id,
                                error = %e,
                                "event rejected"
                            ),
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => session.touch(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %session.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else {
                    break;
                };
                let json = match serde_json::to_string(&*message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(?e, event = %message.event, "failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            _ = heartbeat_timer.tick() => {
                if session.idle_for() >= heartbeat_timeout {
                    tracing::debug!(
                        connection_id = %session.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
            }
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
