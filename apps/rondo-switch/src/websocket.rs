use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::engine::MatchEngine;
use crate::presence::PresenceRegistry;
use crate::protocol::{generate_connection_id, ClientMessage, ServerMessage};
use crate::recorder::Recorder;
use crate::relay::SignalingRelay;

/// Shared handles for the HTTP and WebSocket surfaces.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchEngine>,
    pub presence: Arc<PresenceRegistry>,
    pub relay: Arc<SignalingRelay>,
    pub recorder: Recorder,
}

/// WebSocket upgrade handler for `GET /ws`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection: pump outbound messages from the presence
/// channel into the sink, dispatch inbound frames, and tear everything
/// down when the transport drops.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = generate_connection_id();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.presence.attach(connection_id.clone(), tx.clone());

    let pump_connection_id = connection_id.clone();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        debug!(connection_id = %pump_connection_id, "outbound pump ended");
    });

    let _ = tx.send(ServerMessage::Connected {
        connection_id: connection_id.clone(),
    });
    debug!(%connection_id, "websocket connected");

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(err) => {
                error!(%connection_id, %err, "websocket error");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                dispatch_text(&text, &connection_id, &state, &tx).await;
            }
            Message::Binary(data) => {
                // Tolerate JSON arriving in binary frames.
                match String::from_utf8(data) {
                    Ok(text) => dispatch_text(&text, &connection_id, &state, &tx).await,
                    Err(_) => debug!(%connection_id, "ignoring non-utf8 binary frame"),
                }
            }
            Message::Close(_) => {
                debug!(%connection_id, "received close frame");
                break;
            }
            // Ping/Pong handled by axum.
            _ => {}
        }
    }

    // Teardown order matters: the engine purges queue/match state before
    // the presence slot is freed, so nothing references a dead connection.
    state.engine.disconnect(&connection_id).await;
    debug!(%connection_id, "websocket disconnected");
}

async fn dispatch_text(
    text: &str,
    connection_id: &str,
    state: &AppState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(err) => {
            warn!(%connection_id, %err, "unparseable client message");
            let _ = tx.send(ServerMessage::MatchError {
                message: format!("invalid message format: {err}"),
            });
            return;
        }
    };

    match message {
        ClientMessage::FindMatch {
            participant_id,
            duo_connection_id,
            prefs,
        } => {
            state
                .engine
                .find_match(connection_id, &participant_id, duo_connection_id, prefs)
                .await;
        }
        ClientMessage::EndMatch { match_id } => {
            state.engine.end_match(&match_id).await;
        }
        ClientMessage::Skip { targets } => {
            state.engine.skip(connection_id, &targets).await;
        }
        ClientMessage::Message { to, payload } => {
            state.relay.relay(connection_id, &to, payload);
        }
        ClientMessage::Chat { to, text } => {
            state.relay.chat(connection_id, &to, text);
        }
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}
