//! The serialized event loop.
//!
//! One task owns the [`Switchboard`]. Socket tasks and response timers talk to
//! it only through [`Command`]s, so every event is processed to completion
//! before the next one is looked at.

use axum::extract::ws::Message;
use shared_proto::{ClientEvent, ConnId, RoomType, ServerFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::state::PeerMap;
use crate::switchboard::{Outcome, ResponseTimer, Switchboard};

#[derive(Debug)]
pub enum Command {
    Event {
        conn: ConnId,
        room: RoomType,
        event: ClientEvent,
    },
    Disconnect {
        conn: ConnId,
    },
    ResponseTimeout {
        room: RoomType,
        pairing_id: Uuid,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    commands: mpsc::UnboundedSender<Command>,
}

impl Dispatcher {
    pub fn spawn(switchboard: Switchboard, peers: PeerMap) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(switchboard, peers, rx, tx.downgrade()));
        (Self { commands: tx }, handle)
    }

    pub fn submit(&self, conn: ConnId, room: RoomType, event: ClientEvent) {
        self.send(Command::Event { conn, room, event });
    }

    pub fn disconnect(&self, conn: ConnId) {
        self.send(Command::Disconnect { conn });
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::error!(component = "dispatcher", "event loop is gone; command dropped");
        }
    }
}

async fn run(
    mut switchboard: Switchboard,
    peers: PeerMap,
    mut rx: mpsc::UnboundedReceiver<Command>,
    timer_tx: mpsc::WeakUnboundedSender<Command>,
) {
    tracing::info!(component = "dispatcher", "event loop started");

    while let Some(command) = rx.recv().await {
        let outcome = match command {
            Command::Event { conn, room, event } => {
                tracing::debug!(
                    component = "dispatcher",
                    conn_id = %conn,
                    room = %room,
                    event = event.kind(),
                    "processing event"
                );
                switchboard.handle(&conn, room, event)
            }
            Command::Disconnect { conn } => switchboard.disconnect(&conn),
            Command::ResponseTimeout { room, pairing_id } => {
                switchboard.expire_pairing(room, pairing_id)
            }
        };
        deliver(&peers, outcome, &timer_tx);
    }

    tracing::info!(component = "dispatcher", "event loop stopped");
}

fn deliver(peers: &PeerMap, outcome: Outcome, timer_tx: &mpsc::WeakUnboundedSender<Command>) {
    for delivery in outcome.deliveries {
        let Some(message) = frame_message(&delivery.frame) else {
            continue;
        };
        match peers.get(&delivery.to) {
            // A closed channel means the socket is already gone and its
            // disconnect is queued behind us.
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                tracing::debug!(component = "dispatcher", conn_id = %delivery.to, "no outbound channel for delivery");
            }
        }
    }

    for timer in outcome.timers {
        arm_timer(timer, timer_tx.clone());
    }
}

fn arm_timer(timer: ResponseTimer, timer_tx: mpsc::WeakUnboundedSender<Command>) {
    tokio::spawn(async move {
        tokio::time::sleep(timer.after).await;
        if let Some(tx) = timer_tx.upgrade() {
            let _ = tx.send(Command::ResponseTimeout {
                room: timer.room,
                pairing_id: timer.pairing_id,
            });
        }
    });
}

pub fn frame_message(frame: &ServerFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text)),
        Err(err) => {
            tracing::error!(component = "dispatcher", error = %err, "failed to encode server frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use shared_proto::signaling::Response;
    use shared_proto::ServerEvent;
    use std::sync::Arc;
    use std::time::Duration;

    fn register(peers: &PeerMap, id: &str) -> (ConnId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnId::from(id);
        peers.insert(conn.clone(), tx);
        (conn, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerEvent {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        match message {
            Message::Text(text) => {
                serde_json::from_str::<ServerFrame>(&text)
                    .expect("server frame")
                    .event
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    fn join(dispatcher: &Dispatcher, conn: &ConnId, name: &str) {
        dispatcher.submit(
            conn.clone(),
            RoomType::Voice,
            ClientEvent::JoinRoom {
                id: conn.to_string(),
                name: name.to_string(),
                email: None,
            },
        );
    }

    #[tokio::test]
    async fn routes_deliveries_to_registered_peers() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let (a, mut rx_a) = register(&peers, "a");
        let (b, mut rx_b) = register(&peers, "b");
        let (dispatcher, _handle) = Dispatcher::spawn(Switchboard::new(None), peers.clone());

        join(&dispatcher, &a, "Ann");
        assert!(matches!(next_event(&mut rx_a).await, ServerEvent::RoomUsers { users } if users.len() == 1));

        join(&dispatcher, &b, "Ben");
        assert!(matches!(next_event(&mut rx_a).await, ServerEvent::RoomUsers { users } if users.len() == 2));
        assert!(matches!(next_event(&mut rx_b).await, ServerEvent::RoomUsers { users } if users.len() == 2));

        dispatcher.submit(a.clone(), RoomType::Voice, ClientEvent::StartSearch);
        dispatcher.submit(b.clone(), RoomType::Voice, ClientEvent::StartSearch);

        assert!(matches!(next_event(&mut rx_a).await, ServerEvent::MatchFound { peer_id, .. } if peer_id == b));
        assert!(matches!(next_event(&mut rx_b).await, ServerEvent::MatchFound { peer_id, .. } if peer_id == a));

        dispatcher.disconnect(b.clone());
        assert!(matches!(next_event(&mut rx_a).await, ServerEvent::ChatSkip { by: Some(by), .. } if by == b));
    }

    #[tokio::test]
    async fn response_timeout_releases_silent_peer() {
        let peers: PeerMap = Arc::new(DashMap::new());
        let (a, mut rx_a) = register(&peers, "a");
        let (b, mut rx_b) = register(&peers, "b");
        let switchboard = Switchboard::new(Some(Duration::from_millis(50)));
        let (dispatcher, _handle) = Dispatcher::spawn(switchboard, peers.clone());

        join(&dispatcher, &a, "Ann");
        join(&dispatcher, &b, "Ben");
        dispatcher.submit(a.clone(), RoomType::Voice, ClientEvent::StartSearch);
        dispatcher.submit(b.clone(), RoomType::Voice, ClientEvent::StartSearch);
        dispatcher.submit(
            a.clone(),
            RoomType::Voice,
            ClientEvent::UserResponse {
                response: Response::Connect,
            },
        );

        // a: roster x2, match-found, waiting-peer-response, then chat-skip on expiry.
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(next_event(&mut rx_a).await);
        }
        assert!(matches!(seen[2], ServerEvent::MatchFound { .. }));
        assert!(matches!(seen[3], ServerEvent::WaitingPeerResponse));
        assert!(matches!(&seen[4], ServerEvent::ChatSkip { by: Some(by), .. } if *by == b));

        let _ = next_event(&mut rx_b).await;
        assert!(matches!(next_event(&mut rx_b).await, ServerEvent::MatchFound { .. }));
        assert!(matches!(next_event(&mut rx_b).await, ServerEvent::ChatEnded { by: None, .. }));
    }

    #[test]
    fn frames_encode_as_text() {
        let frame = ServerFrame::connection(ServerEvent::WaitingPeerResponse);
        let message = frame_message(&frame).expect("encoded");
        assert!(matches!(message, Message::Text(text) if text.contains("waiting-peer-response")));
    }
}
