use super::protocol::{
    close_frame_too_large, is_frame_size_violation, send_raw, MAX_FRAME_BYTES,
};
use crate::error::{ApiError, ErrorCode};
use crate::registry::{JoinedRoom, RoomRegistry};
use crate::room::{Identity, RoomCommand};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

// Server pings every interval; a peer that misses three pings in a row
// is reaped even without a TCP FIN.
pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 45_000;

#[derive(Clone)]
struct WsRouterState {
    registry: Arc<RoomRegistry>,
}

/// Identity fields placed on the upgrade request by the upstream auth
/// layer. Already verified; the room trusts them as-is.
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    email: Option<String>,
    name: Option<String>,
}

pub fn router(registry: Arc<RoomRegistry>) -> Router {
    Router::new()
        .route("/v1/rooms/{key}/ws", get(ws_upgrade))
        .with_state(WsRouterState { registry })
}

async fn ws_upgrade(
    Path(key): Path<String>,
    Query(query): Query<ConnectQuery>,
    State(state): State<WsRouterState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(_) => return ApiError::from_code(ErrorCode::UpgradeRequired).into_response(),
    };

    let identity = Identity {
        email: query
            .email
            .filter(|email| !email.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        name: query.name,
    };

    upgrade
        .max_frame_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| handle_socket(state.registry, key, identity, socket))
}

async fn handle_socket(
    registry: Arc<RoomRegistry>,
    key: String,
    identity: Identity,
    mut socket: WebSocket,
) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let joined = match registry.join(&key, identity, outbound_tx).await {
        Ok(joined) => joined,
        Err(join_error) => {
            warn!(room = %key, error = ?join_error, "closing socket, room unavailable");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let mut graceful = false;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(room = %key, connection_id = joined.connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_frame = outbound_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if send_raw(&mut socket, frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        if raw.len() > MAX_FRAME_BYTES as usize {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }
                        dispatch_frame(&joined, &key, raw.as_str());
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => {
                        graceful = true;
                        break;
                    }
                    // Binary frames are not part of the protocol.
                    Ok(_) => {}
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    let _ = joined.commands.send(RoomCommand::Leave {
        connection_id: joined.connection_id,
        graceful,
    });
}

/// Decode one inbound text frame and forward it to the room. There is
/// no error-reply channel: malformed or unexpected frames are dropped
/// and the connection stays open.
fn dispatch_frame(joined: &JoinedRoom, key: &str, raw: &str) {
    use sessionroom_common::protocol::ws::{decode_frame, WsMessage};

    match decode_frame(raw) {
        Ok(WsMessage::YjsUpdate { data }) => {
            let _ = joined.commands.send(RoomCommand::Update {
                connection_id: joined.connection_id,
                data,
                raw: raw.to_owned(),
            });
        }
        Ok(WsMessage::CursorUpdate { cursor, .. }) => {
            // Any client-supplied `user` is ignored; the room wraps the
            // relay with its own presence record.
            let _ = joined.commands.send(RoomCommand::Cursor {
                connection_id: joined.connection_id,
                cursor,
            });
        }
        Ok(WsMessage::AwarenessUpdate { .. }) => {
            let _ = joined.commands.send(RoomCommand::Awareness {
                connection_id: joined.connection_id,
                raw: raw.to_owned(),
            });
        }
        Ok(unexpected) => {
            debug!(room = %key, connection_id = joined.connection_id, frame = ?unexpected, "ignoring server-only frame from client");
        }
        Err(decode_error) => {
            warn!(room = %key, connection_id = joined.connection_id, error = %decode_error, "dropping malformed frame");
        }
    }
}
