//! Live-stream WebSocket endpoint (§4.5, §6.4). Adapted from the teacher's
//! node-registry websocket handler onto the event bus's connection/frame
//! types.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use th_protocol::ClientFrame;

use crate::state::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut rx) = state.hub.register();
    let connection_id = conn.id.clone();

    let welcome = th_protocol::ServerFrame::connection_established(connection_id.clone());
    if send_frame(&mut sink, &welcome).await.is_err() {
        state.hub.remove(&connection_id);
        return;
    }

    loop {
        tokio::select! {
            broadcast = rx.recv() => {
                match broadcast {
                    Some(frame) => {
                        if send_frame(&mut sink, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => {
                            if let Some(reply) = state.hub.handle_client_frame(&connection_id, frame) {
                                if send_frame(&mut sink, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!(connection_id = %connection_id, error = %e, "dropping malformed ws frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "ws read error");
                        break;
                    }
                }
            }
        }
    }

    state.hub.remove(&connection_id);
}

async fn send_frame(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &th_protocol::ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    sink.send(Message::Text(text)).await
}
