//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, Outbound, PlayerId, RoomInput, Target};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token issued when the participant was added
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify the session token before upgrading
    match state.rooms.authorize(&query.token) {
        Ok((handle, claims)) => {
            info!(room_id = %claims.room_id, player_id = %claims.player_id, "WebSocket upgrade for participant");
            ws.on_upgrade(move |socket| handle_socket(socket, handle, claims.player_id))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, handle: MatchHandle, player_id: PlayerId) {
    let connection_id = Uuid::new_v4();
    let room_id = handle.id;
    info!(room_id = %room_id, player_id = %player_id, connection_id = %connection_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before attaching so the welcome is not missed
    let outbound_rx = handle.subscribe();

    let (reply, attached) = oneshot::channel();
    let attach = RoomInput::Connect {
        player_id,
        connection_id,
        reply,
    };
    let result = match handle.input_tx.send(attach).await {
        Ok(()) => attached.await.ok(),
        Err(_) => None,
    };
    match result {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            warn!(room_id = %room_id, player_id = %player_id, error = %e, "Room refused connection");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error("join_refused", e.to_string())).await;
            return;
        }
        None => {
            let msg = ServerMsg::RoomAborted {
                reason: "room is no longer running".to_string(),
            };
            let _ = send_msg(&mut ws_sink, &msg).await;
            return;
        }
    }

    run_session(
        player_id,
        connection_id,
        ws_sink,
        ws_stream,
        handle.input_tx.clone(),
        outbound_rx,
    )
    .await;

    // Signal disconnect so the room starts the reconnect grace
    let _ = handle
        .input_tx
        .send(RoomInput::Disconnect {
            player_id,
            connection_id,
        })
        .await;

    info!(room_id = %room_id, player_id = %player_id, "WebSocket connection closed");
}

/// Whether an outbound message should reach this socket
fn is_for(target: Target, player_id: PlayerId, connection_id: Uuid) -> bool {
    match target {
        Target::All => true,
        Target::Player(id) => id == player_id,
        Target::Connection(id) => id == connection_id,
    }
}

/// Messages after which the socket is closed
fn ends_session(msg: &ServerMsg) -> bool {
    matches!(msg, ServerMsg::Kicked { .. } | ServerMsg::RoomAborted { .. })
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: PlayerId,
    connection_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<RoomInput>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
) {
    let rate_limiter = PlayerRateLimiter::default();

    // Spawn writer task: room broadcast -> WebSocket
    let mut writer_handle = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(Outbound { target, msg }) => {
                    if !is_for(target, player_id, connection_id) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                        break;
                    }
                    if ends_session(&msg) {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        player_id = %player_id,
                        lagged_count = n,
                        "Client lagged, skipping {} messages", n
                    );
                    // Continue - the next snapshot is a full state
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(player_id = %player_id, "Room broadcast closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> room input queue
    loop {
        let result = tokio::select! {
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => break,
            },
            _ = &mut writer_handle => {
                debug!(player_id = %player_id, "Writer finished, closing session");
                return;
            }
        };

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        let input = RoomInput::Client {
                            player_id,
                            connection_id,
                            msg,
                        };
                        match input_tx.try_send(input) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(player_id = %player_id, "Room input channel full, dropping message");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!(player_id = %player_id, "Room input channel closed");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
