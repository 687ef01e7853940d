use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use shared_proto::signaling::{ErrorCode, Response};
use shared_proto::{is_initiator, ClientEvent, ClientFrame, ConnId, RoomType, ServerEvent, ServerFrame};
use stranger_server::auth::issue_token;
use stranger_server::config::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(stranger_server::serve_on(listener, config));
    addr
}

async fn connect(addr: SocketAddr, query: &str) -> (Socket, ConnId) {
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws{query}"))
        .await
        .expect("websocket connect");
    match recv(&mut socket).await {
        ServerEvent::Welcome { conn_id, .. } => (socket, conn_id),
        other => panic!("expected welcome, got {other:?}"),
    }
}

async fn send(socket: &mut Socket, event: ClientEvent) {
    let text = serde_json::to_string(&ClientFrame::new(RoomType::Video, event)).expect("encode");
    socket.send(Message::Text(text)).await.expect("send frame");
}

async fn recv(socket: &mut Socket) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .expect("valid message");
        if let Message::Text(text) = message {
            return serde_json::from_str::<ServerFrame>(&text)
                .expect("server frame")
                .event;
        }
    }
}

async fn recv_until(socket: &mut Socket, wanted: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = recv(socket).await;
        if wanted(&event) {
            return event;
        }
    }
}

async fn join(socket: &mut Socket, id: &str, name: &str) {
    send(
        socket,
        ClientEvent::JoinRoom {
            id: id.to_string(),
            name: name.to_string(),
            email: None,
        },
    )
    .await;
}

#[tokio::test]
async fn two_strangers_match_connect_relay_and_hang_up() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut ann, ann_id) = connect(addr, "").await;
    let (mut ben, ben_id) = connect(addr, "").await;

    join(&mut ann, "u-ann", "Ann").await;
    recv_until(&mut ann, |e| matches!(e, ServerEvent::RoomUsers { users } if users.len() == 1)).await;
    join(&mut ben, "u-ben", "Ben").await;
    recv_until(&mut ben, |e| matches!(e, ServerEvent::RoomUsers { users } if users.len() == 2)).await;

    send(&mut ann, ClientEvent::StartSearch).await;
    send(&mut ben, ClientEvent::StartSearch).await;

    let found = recv_until(&mut ann, |e| matches!(e, ServerEvent::MatchFound { .. })).await;
    assert!(matches!(found, ServerEvent::MatchFound { peer_id, peer_info } if peer_id == ben_id && peer_info.name == "Ben"));
    recv_until(&mut ben, |e| matches!(e, ServerEvent::MatchFound { .. })).await;

    send(&mut ann, ClientEvent::UserResponse { response: Response::Connect }).await;
    assert_eq!(recv(&mut ann).await, ServerEvent::WaitingPeerResponse);
    send(&mut ben, ClientEvent::UserResponse { response: Response::Connect }).await;

    assert!(matches!(recv(&mut ann).await, ServerEvent::ChatStart { peer_id, .. } if peer_id == ben_id));
    assert!(matches!(recv(&mut ben).await, ServerEvent::ChatStart { peer_id, .. } if peer_id == ann_id));

    let (initiator, initiator_id, responder, responder_id) = if is_initiator(&ann_id, &ben_id) {
        (&mut ann, ann_id.clone(), &mut ben, ben_id.clone())
    } else {
        (&mut ben, ben_id.clone(), &mut ann, ann_id.clone())
    };

    let offer = json!({ "type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n" });
    send(
        initiator,
        ClientEvent::Offer {
            payload: offer.clone(),
            to: responder_id.clone(),
        },
    )
    .await;
    assert_eq!(
        recv(responder).await,
        ServerEvent::Offer {
            payload: offer,
            from: initiator_id.clone(),
        }
    );

    initiator.close(None).await.expect("close");
    assert!(matches!(
        recv(responder).await,
        ServerEvent::ChatEnded { by: Some(by), .. } if by == initiator_id
    ));
}

#[tokio::test]
async fn malformed_frames_get_protocol_errors() {
    let addr = start_server(ServerConfig::default()).await;
    let (mut socket, _) = connect(addr, "").await;

    socket
        .send(Message::Text("{not json".to_string()))
        .await
        .expect("send");
    assert!(matches!(
        recv(&mut socket).await,
        ServerEvent::Error { code: ErrorCode::Protocol, .. }
    ));

    let future_version = json!({ "version": 99, "room": "voice", "event": { "type": "start-search" } });
    socket
        .send(Message::Text(future_version.to_string()))
        .await
        .expect("send");
    assert!(matches!(
        recv(&mut socket).await,
        ServerEvent::Error { code: ErrorCode::UnsupportedVersion, .. }
    ));
}

#[tokio::test]
async fn token_identity_replaces_join_payload() {
    let secret = b"integration-secret".to_vec();
    let config = ServerConfig {
        jwt_secret: Some(secret.clone()),
        ..ServerConfig::default()
    };
    let addr = start_server(config).await;

    assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());

    let token = issue_token("user-42", "verified", &secret, chrono::Duration::minutes(5)).expect("token");
    let (mut socket, _) = connect(addr, &format!("?token={token}")).await;
    join(&mut socket, "spoofed", "Mallory").await;

    match recv_until(&mut socket, |e| matches!(e, ServerEvent::RoomUsers { .. })).await {
        ServerEvent::RoomUsers { users } => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, "user-42");
            assert_eq!(users[0].name, "verified");
        }
        other => panic!("unexpected event {other:?}"),
    }
}
