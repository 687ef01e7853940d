use futures_util::{SinkExt, StreamExt};
use shared_proto::{ClientEvent, ClientFrame, RoomType, ServerFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// A socket is up. Anything sent before this on a previous socket is lost.
    Connected,
    Frame(ServerFrame),
    Disconnected,
}

/// Sending half handed to the driver. Survives reconnects.
#[derive(Clone)]
pub struct SignalingHandle {
    room: RoomType,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

impl SignalingHandle {
    pub fn send(&self, event: ClientEvent) -> ClientResult<()> {
        tracing::debug!(component = "ws.send", room = %self.room, event = event.kind(), "queueing client event");
        self.outbound
            .send(ClientFrame::new(self.room, event))
            .map_err(|_| ClientError::Disconnected)
    }

    #[cfg(test)]
    pub(crate) fn detached(room: RoomType) -> (Self, mpsc::UnboundedReceiver<ClientFrame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { room, outbound }, rx)
    }
}

/// Keeps one signaling connection alive, reconnecting with backoff.
pub fn spawn(
    url: Url,
    room: RoomType,
    backoff: BackoffConfig,
) -> (SignalingHandle, mpsc::UnboundedReceiver<SignalingEvent>, JoinHandle<()>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(url, backoff, outbound_rx, events_tx));
    (
        SignalingHandle {
            room,
            outbound: outbound_tx,
        },
        events_rx,
        task,
    )
}

async fn run(
    url: Url,
    config: BackoffConfig,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    events: mpsc::UnboundedSender<SignalingEvent>,
) {
    let mut backoff = Backoff::new(config);
    let mut connected_before = false;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                tracing::info!(component = "ws", url = %redacted(&url), "connected to signaling server");
                backoff.reset();

                // Frames queued while offline belong to the old session. Before the
                // first connect there is no old session, so they go out as-is.
                if connected_before {
                    while outbound.try_recv().is_ok() {}
                }
                connected_before = true;
                if events.send(SignalingEvent::Connected).is_err() {
                    return;
                }

                let keep_going = pump(stream, &mut outbound, &events).await;
                if !keep_going || events.send(SignalingEvent::Disconnected).is_err() {
                    return;
                }
                tracing::warn!(component = "ws", "signaling connection dropped");
            }
            Err(err) => {
                tracing::warn!(component = "ws", error = %err, attempt = backoff.attempts(), "signaling connect failed");
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(component = "ws", delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

/// Returns false once the driver has gone away.
async fn pump(
    stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
    events: &mpsc::UnboundedSender<SignalingEvent>,
) -> bool {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = write.close().await;
                    return false;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(component = "ws.send", error = %err, "failed to encode client frame");
                        continue;
                    }
                };
                if let Err(err) = write.send(Message::Text(text)).await {
                    tracing::warn!(component = "ws.send", error = %err, "send failed");
                    return true;
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if events.send(SignalingEvent::Frame(frame)).is_err() {
                                return false;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(component = "ws.recv", error = %err, "ignoring unparseable server frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => return true,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(component = "ws.recv", error = %err, "websocket read failed");
                        return true;
                    }
                }
            }
        }
    }
}

fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_proto::{ConnId, ServerEvent};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn welcome(id: &str) -> String {
        serde_json::to_string(&ServerFrame::connection(ServerEvent::Welcome {
            conn_id: ConnId::from(id),
            protocol_version: 2,
        }))
        .expect("encode welcome")
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    #[tokio::test]
    async fn reconnects_after_server_drops_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            for id in ["first", "second"] {
                let (tcp, _) = listener.accept().await.expect("accept");
                let mut ws = accept_async(tcp).await.expect("handshake");
                ws.send(Message::Text(welcome(id))).await.expect("send welcome");
                if id == "first" {
                    ws.close(None).await.expect("close");
                } else {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => return text,
                        other => panic!("expected client frame, got {other:?}"),
                    }
                }
            }
            String::new()
        });

        let fast = BackoffConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter_ratio: 0.0,
        };
        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
        let (handle, mut events, task) = spawn(url, RoomType::Voice, fast);

        assert_eq!(next(&mut events).await, SignalingEvent::Connected);
        assert!(matches!(next(&mut events).await, SignalingEvent::Frame(_)));
        assert_eq!(next(&mut events).await, SignalingEvent::Disconnected);
        assert_eq!(next(&mut events).await, SignalingEvent::Connected);
        assert!(matches!(
            next(&mut events).await,
            SignalingEvent::Frame(ServerFrame { event: ServerEvent::Welcome { conn_id, .. }, .. }) if conn_id.as_str() == "second"
        ));

        handle.send(ClientEvent::StartSearch).expect("send");
        let raw = server.await.expect("server task");
        let frame: ClientFrame = serde_json::from_str(&raw).expect("client frame");
        assert_eq!(frame.room, RoomType::Voice);
        assert_eq!(frame.event, ClientEvent::StartSearch);

        task.abort();
    }

    #[tokio::test]
    async fn frames_queued_before_first_connect_are_sent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let url = Url::parse(&format!("ws://{addr}/ws")).expect("url");
        let (handle, mut events, task) = spawn(url, RoomType::Video, BackoffConfig::websocket_default());

        handle
            .send(ClientEvent::JoinRoom {
                id: "u-1".to_string(),
                name: "Ada".to_string(),
                email: None,
            })
            .expect("queue join");
        handle.send(ClientEvent::StartSearch).expect("queue search");

        let (tcp, _) = listener.accept().await.expect("accept");
        let mut ws = accept_async(tcp).await.expect("handshake");
        assert_eq!(next(&mut events).await, SignalingEvent::Connected);

        let mut received = Vec::new();
        for _ in 0..2 {
            let text = match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => text,
                other => panic!("expected queued client frame, got {other:?}"),
            };
            let frame: ClientFrame = serde_json::from_str(&text).expect("client frame");
            received.push(frame.event);
        }

        assert!(matches!(&received[0], ClientEvent::JoinRoom { id, .. } if id == "u-1"));
        assert_eq!(received[1], ClientEvent::StartSearch);
        task.abort();
    }

    #[test]
    fn query_is_hidden_in_logs() {
        let url = Url::parse("ws://host:3000/ws?token=secret").expect("url");
        assert_eq!(redacted(&url), "ws://host:3000/ws");
    }
}
