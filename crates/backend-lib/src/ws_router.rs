//! HTTP surface: the WebSocket upgrade at `GET /reflect` and the transport
//! adapter between a socket and the coordinator.

use std::net::SocketAddr;
use std::sync::Arc;

use ::metrics::{counter, gauge};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::coordinator::ClientSession;
use crate::messages::ClientEnvelope;
use crate::metrics as keys;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/reflect", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    counter!(keys::WS_CONNECTION).increment(1);
    ws.on_upgrade(move |socket| handle_connection(socket, state, addr))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    gauge!(keys::WS_ACTIVE).increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(addr.to_string(), tx);

    // One writer per socket; the transport does not allow concurrent frames.
    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let frame = match serde_json::to_string(&envelope) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(%error, "failed to serialize outbound envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = ClientSession::open(state, handle.clone());

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let envelope: ClientEnvelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        warn!(%addr, %error, "malformed envelope, closing channel");
                        break;
                    }
                };
                session.handle_envelope(envelope).await;
            }
            Message::Close(_) => {
                debug!(%addr, "client closed connection");
                break;
            }
            _ => {}
        }
    }

    session.close(&handle);
    writer.abort();
    gauge!(keys::WS_ACTIVE).decrement(1.0);
}
