use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use shared_proto::signaling::{is_supported_protocol_version, ErrorCode, PROTOCOL_VERSION};
use shared_proto::{ClientEvent, ClientFrame, ConnId, ServerEvent, ServerFrame};
use tokio::sync::mpsc;
use validator::Validate;

use crate::auth::{resolve_identity, CallerIdentity};
use crate::dispatcher::frame_message;
use crate::state::{AppState, Tx};
use crate::validation::JoinRequest;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let identity = match resolve_identity(params.token.as_deref(), state.config.jwt_secret.as_deref()) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::warn!(component = "ws", error = %err, "rejecting websocket upgrade");
            return err.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Option<CallerIdentity>) {
    let conn = ConnId::generate();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    state.register(conn.clone(), tx.clone());
    tracing::info!(
        component = "ws",
        conn_id = %conn,
        user_id = identity.as_ref().map(|id| id.user_id.as_str()).unwrap_or("anonymous"),
        online = state.online_count(),
        "websocket connected"
    );

    send_frame(
        &tx,
        ServerFrame::connection(ServerEvent::Welcome {
            conn_id: conn.clone(),
            protocol_version: PROTOCOL_VERSION,
        }),
    );

    let ping_interval = state.config.ping_interval;
    let mut writer = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(ping_interval);
        ping_ticker.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if ws_sender.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, &conn, identity.as_ref(), &tx, &text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(component = "ws", conn_id = %conn, error = %err, "websocket read failed");
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    state.unregister(&conn);
    state.dispatcher.disconnect(conn.clone());
    writer.abort();
    tracing::info!(component = "ws", conn_id = %conn, online = state.online_count(), "websocket disconnected");
}

fn handle_text(
    state: &AppState,
    conn: &ConnId,
    identity: Option<&CallerIdentity>,
    tx: &Tx,
    text: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(component = "ws", conn_id = %conn, error = %err, "unparseable client frame");
            send_error(tx, ErrorCode::Protocol, format!("invalid frame: {err}"));
            return;
        }
    };

    if !is_supported_protocol_version(frame.version) {
        tracing::warn!(component = "ws", conn_id = %conn, version = frame.version, "unsupported protocol version");
        send_error(
            tx,
            ErrorCode::UnsupportedVersion,
            format!("protocol version {} is not supported", frame.version),
        );
        return;
    }

    let event = match frame.event {
        ClientEvent::JoinRoom { id, name, email } => match admit_join(conn, identity, id, name, email) {
            Some(event) => event,
            None => return,
        },
        event => event,
    };

    state.dispatcher.submit(conn.clone(), frame.room, event);
}

/// Authenticated callers keep their token identity whatever the payload says.
fn admit_join(
    conn: &ConnId,
    identity: Option<&CallerIdentity>,
    id: String,
    name: String,
    email: Option<String>,
) -> Option<ClientEvent> {
    let (id, name) = match identity {
        Some(identity) => (identity.user_id.clone(), identity.name.clone()),
        None => (id, name),
    };
    let request = JoinRequest::normalized(id, name, email);
    if let Err(err) = request.validate() {
        tracing::warn!(component = "ws", conn_id = %conn, error = %err, "ignoring invalid join-room");
        return None;
    }
    Some(request.into_event())
}

fn send_frame(tx: &Tx, frame: ServerFrame) {
    if let Some(message) = frame_message(&frame) {
        let _ = tx.send(message);
    }
}

fn send_error(tx: &Tx, code: ErrorCode, message: String) {
    send_frame(tx, ServerFrame::connection(ServerEvent::Error { code, message }));
}
