//! Websocket transport (§4.5.1, §4.5.2): upgrades a connection, registers
//! it with the session's engine, and pumps messages in both directions
//! until either side closes. Mirrors the teacher's `ws_receiver` shape —
//! an upgrade handler plus a per-connection pump function — generalized
//! from one forwarder-auth handshake to per-session multiplexed streams.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use sequencer_protocol::http::error_codes;
use sequencer_protocol::limits::MAX_MESSAGE_SIZE;
use sequencer_protocol::{ClientMessage, ServerBroadcast};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::AttachOutcome;
use crate::state::AppState;

pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_socket(socket, state, session_id))
}

async fn handle_session_socket(mut socket: WebSocket, state: AppState, session_id: String) {
    let Ok(id) = session_id.parse::<Uuid>() else {
        send_error(&mut socket, "session id is not a valid UUID").await;
        return;
    };

    let engine = match state.get_or_spawn_engine(id).await {
        Ok(Some(engine)) => engine,
        Ok(None) => {
            send_error(&mut socket, "session not found").await;
            return;
        }
        Err(err) => {
            warn!(session_id = %id, error = %err, "failed to load session");
            send_error(&mut socket, "internal error loading session").await;
            return;
        }
    };

    let player_id = Uuid::new_v4().to_string();
    let mut outbound = match engine.attach(player_id.clone()).await {
        AttachOutcome::Attached { outbound } => outbound,
        AttachOutcome::CapacityExceeded => {
            send_error(&mut socket, error_codes::CAPACITY).await;
            return;
        }
    };

    info!(session_id = %id, player_id = %player_id, "websocket connected");

    loop {
        tokio::select! {
            broadcast = outbound.recv() => {
                match broadcast {
                    Some(broadcast) => {
                        if send_broadcast(&mut socket, &broadcast).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_MESSAGE_SIZE {
                            send_error(&mut socket, error_codes::PAYLOAD_TOO_LARGE).await;
                            break;
                        }
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => engine.inbound(player_id.clone(), message).await,
                            Err(err) => {
                                warn!(session_id = %id, player_id = %player_id, error = %err, "malformed client message");
                                send_error(&mut socket, "malformed message").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(session_id = %id, player_id = %player_id, error = %err, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    engine.detach(player_id.clone()).await;
    info!(session_id = %id, player_id = %player_id, "websocket disconnected");
}

async fn send_broadcast(socket: &mut WebSocket, broadcast: &ServerBroadcast) -> Result<(), axum::Error> {
    let json = serde_json::to_string(broadcast).unwrap_or_default();
    socket.send(Message::Text(json)).await
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let broadcast = ServerBroadcast::Error { message: message.to_owned() };
    let _ = send_broadcast(socket, &broadcast).await;
}
