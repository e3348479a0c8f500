// Socket-level frame helpers shared by the gateway loop.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};

pub(crate) const MAX_FRAME_BYTES: u32 = 262_144;

pub(crate) async fn send_raw(socket: &mut WebSocket, frame: String) -> Result<(), ()> {
    socket.send(Message::Text(frame.into())).await.map_err(|_| ())
}

pub(crate) fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

pub(crate) fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

pub(crate) async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}
