//! Authoritative call-session logic for every room type.
//!
//! The switchboard performs no I/O. Each call returns an [`Outcome`] listing
//! the frames to deliver and the response timers to arm; the dispatcher owns
//! the only instance and feeds it one event at a time.

use serde_json::Value;
use shared_proto::signaling::{RelayKind, Response};
use shared_proto::{
    CallState, ClientEvent, ConnId, ParticipantInfo, RoomType, ServerEvent, ServerFrame,
    SessionEvent,
};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::matchmaking::{MatchQueue, Pairing, ResponseOutcome};
use crate::presence::PresenceRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnId,
    pub frame: ServerFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseTimer {
    pub room: RoomType,
    pub pairing_id: Uuid,
    pub after: Duration,
}

#[derive(Debug, Default)]
pub struct Outcome {
    pub deliveries: Vec<Delivery>,
    pub timers: Vec<ResponseTimer>,
}

impl Outcome {
    fn send(&mut self, to: &ConnId, room: RoomType, event: ServerEvent) {
        self.deliveries.push(Delivery {
            to: to.clone(),
            frame: ServerFrame::room(room, event),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.timers.is_empty()
    }

    #[cfg(test)]
    pub fn events_for(&self, conn: &ConnId) -> Vec<&ServerEvent> {
        self.deliveries
            .iter()
            .filter(|delivery| &delivery.to == conn)
            .map(|delivery| &delivery.frame.event)
            .collect()
    }
}

struct Lobby {
    room: RoomType,
    presence: PresenceRegistry,
    queue: MatchQueue,
}

impl Lobby {
    fn new(room: RoomType) -> Self {
        Self {
            room,
            presence: PresenceRegistry::new(),
            queue: MatchQueue::new(),
        }
    }

    fn display(&self, conn: &ConnId) -> ParticipantInfo {
        self.presence
            .info(conn)
            .cloned()
            .unwrap_or_else(|| ParticipantInfo {
                id: conn.to_string(),
                name: "Stranger".to_string(),
                email: None,
            })
    }

    fn name_of(&self, conn: &ConnId) -> Option<String> {
        self.presence.info(conn).map(|info| info.name.clone())
    }

    fn permits(&self, conn: &ConnId, event: SessionEvent) -> bool {
        let state = self.queue.state_of(conn);
        let allowed = state.on(event).is_some();
        if !allowed {
            tracing::debug!(
                component = "switchboard",
                room = %self.room,
                conn_id = %conn,
                state = state.as_str(),
                event = ?event,
                "ignoring invalid transition"
            );
        }
        allowed
    }

    fn broadcast_roster(&self, out: &mut Outcome) {
        let users = self.presence.list_present();
        for conn in self.presence.connections() {
            out.send(
                conn,
                self.room,
                ServerEvent::RoomUsers {
                    users: users.clone(),
                },
            );
        }
    }

    fn join(&mut self, conn: &ConnId, info: ParticipantInfo, out: &mut Outcome) {
        if !self.presence.join(conn.clone(), info) {
            tracing::debug!(component = "presence", room = %self.room, conn_id = %conn, "already joined");
            return;
        }
        tracing::info!(
            component = "presence",
            room = %self.room,
            conn_id = %conn,
            present = self.presence.len(),
            "participant joined"
        );
        self.broadcast_roster(out);
    }

    fn start_search(&mut self, conn: &ConnId, timeout: Option<Duration>, out: &mut Outcome) {
        if !self.presence.contains(conn) {
            tracing::debug!(component = "matchmaking", room = %self.room, conn_id = %conn, "start-search before join-room");
            return;
        }
        if !self.permits(conn, SessionEvent::StartSearch) {
            return;
        }
        self.requeue(conn.clone());
        self.pair_waiting(timeout, out);
    }

    fn requeue(&mut self, conn: ConnId) {
        match self.queue.enqueue(conn.clone()) {
            Ok(()) => tracing::debug!(
                component = "matchmaking",
                room = %self.room,
                conn_id = %conn,
                waiting = self.queue.waiting_len(),
                "participant searching"
            ),
            Err(err) => tracing::warn!(
                component = "matchmaking",
                room = %self.room,
                conn_id = %conn,
                error = %err,
                "enqueue rejected"
            ),
        }
    }

    fn pair_waiting(&mut self, timeout: Option<Duration>, out: &mut Outcome) {
        while let Some(pairing) = self.queue.pair_next() {
            let [a, b] = &pairing.members;
            tracing::info!(
                component = "matchmaking",
                room = %self.room,
                pairing_id = %pairing.id,
                a = %a,
                b = %b,
                "pairing formed"
            );
            out.send(
                a,
                self.room,
                ServerEvent::MatchFound {
                    peer_id: b.clone(),
                    peer_info: self.display(b),
                },
            );
            out.send(
                b,
                self.room,
                ServerEvent::MatchFound {
                    peer_id: a.clone(),
                    peer_info: self.display(a),
                },
            );
            if let Some(after) = timeout {
                out.timers.push(ResponseTimer {
                    room: self.room,
                    pairing_id: pairing.id,
                    after,
                });
            }
        }
    }

    fn respond(
        &mut self,
        conn: &ConnId,
        response: Response,
        timeout: Option<Duration>,
        out: &mut Outcome,
    ) {
        let event = match response {
            Response::Connect => SessionEvent::RespondConnect,
            Response::Skip => SessionEvent::RespondSkip,
        };
        let Some(pairing_id) = self.queue.pairing_of(conn).map(|pairing| pairing.id) else {
            tracing::debug!(component = "matchmaking", room = %self.room, conn_id = %conn, "response without pairing");
            return;
        };
        if !self.permits(conn, event) {
            return;
        }

        match self.queue.respond(pairing_id, conn, response) {
            Ok(ResponseOutcome::AwaitingPeer { peer }) => {
                tracing::debug!(
                    component = "matchmaking",
                    room = %self.room,
                    pairing_id = %pairing_id,
                    conn_id = %conn,
                    peer_id = %peer,
                    "waiting for peer response"
                );
                out.send(conn, self.room, ServerEvent::WaitingPeerResponse);
            }
            Ok(ResponseOutcome::Activated(pairing)) => self.start_call(&pairing, out),
            Ok(ResponseOutcome::Declined(pairing)) => self.skipped(&pairing, conn, timeout, out),
            Err(err) => tracing::debug!(
                component = "matchmaking",
                room = %self.room,
                pairing_id = %pairing_id,
                conn_id = %conn,
                error = %err,
                "ignoring response"
            ),
        }
    }

    fn start_call(&self, pairing: &Pairing, out: &mut Outcome) {
        tracing::info!(
            component = "call",
            room = %self.room,
            pairing_id = %pairing.id,
            initiator = %pairing.call.as_ref().map(|call| call.initiator.as_str()).unwrap_or_default(),
            "active call started"
        );
        for member in &pairing.members {
            if let Some(peer) = pairing.peer_of(member) {
                out.send(
                    member,
                    self.room,
                    ServerEvent::ChatStart {
                        peer_id: peer.clone(),
                        peer_info: self.display(peer),
                    },
                );
            }
        }
    }

    /// `by` skipped: counterpart is told, then both go back to the pool.
    fn skipped(&mut self, pairing: &Pairing, by: &ConnId, timeout: Option<Duration>, out: &mut Outcome) {
        let Some(peer) = pairing.peer_of(by).cloned() else {
            return;
        };
        tracing::info!(
            component = "matchmaking",
            room = %self.room,
            pairing_id = %pairing.id,
            by = %by,
            peer_id = %peer,
            "pairing skipped"
        );
        out.send(
            &peer,
            self.room,
            ServerEvent::ChatSkip {
                by: Some(by.clone()),
                name: self.name_of(by),
            },
        );
        self.requeue(by.clone());
        self.requeue(peer);
        self.pair_waiting(timeout, out);
    }

    fn addressed_to_peer(&self, conn: &ConnId, to: Option<&ConnId>) -> bool {
        match to {
            None => true,
            Some(to) => self
                .queue
                .pairing_of(conn)
                .and_then(|pairing| pairing.peer_of(conn))
                == Some(to),
        }
    }

    fn end_chat(&mut self, conn: &ConnId, to: Option<&ConnId>, timeout: Option<Duration>, out: &mut Outcome) {
        if !self.queue.state_of(conn).is_paired() || !self.addressed_to_peer(conn, to) {
            tracing::debug!(component = "call", room = %self.room, conn_id = %conn, "ignoring chat-ended outside own pairing");
            return;
        }
        if let Some(pairing) = self.queue.dissolve(conn) {
            self.notify_abandoned(&pairing, conn, timeout, out);
        }
    }

    fn skip_chat(&mut self, conn: &ConnId, to: Option<&ConnId>, timeout: Option<Duration>, out: &mut Outcome) {
        if !self.addressed_to_peer(conn, to) {
            tracing::debug!(component = "call", room = %self.room, conn_id = %conn, "ignoring chat-skip for foreign pairing");
            return;
        }
        match self.queue.state_of(conn) {
            CallState::Chatting => {
                if let Some(pairing) = self.queue.dissolve(conn) {
                    self.skipped(&pairing, conn, timeout, out);
                }
            }
            CallState::Matched | CallState::Waiting => self.respond(conn, Response::Skip, timeout, out),
            state => tracing::debug!(
                component = "call",
                room = %self.room,
                conn_id = %conn,
                state = state.as_str(),
                "ignoring chat-skip without pairing"
            ),
        }
    }

    /// `by` left a pairing it did not skip: the counterpart of an active call
    /// goes idle, the counterpart of a pending pairing goes back to searching.
    fn notify_abandoned(&mut self, pairing: &Pairing, by: &ConnId, timeout: Option<Duration>, out: &mut Outcome) {
        let Some(peer) = pairing.peer_of(by).cloned() else {
            return;
        };
        let name = self.name_of(by);
        if pairing.is_active() {
            tracing::info!(
                component = "call",
                room = %self.room,
                pairing_id = %pairing.id,
                by = %by,
                peer_id = %peer,
                "active call ended"
            );
            out.send(
                &peer,
                self.room,
                ServerEvent::ChatEnded {
                    by: Some(by.clone()),
                    name,
                },
            );
        } else {
            tracing::info!(
                component = "matchmaking",
                room = %self.room,
                pairing_id = %pairing.id,
                by = %by,
                peer_id = %peer,
                "pairing abandoned"
            );
            out.send(
                &peer,
                self.room,
                ServerEvent::ChatSkip {
                    by: Some(by.clone()),
                    name,
                },
            );
            self.requeue(peer);
            self.pair_waiting(timeout, out);
        }
    }

    fn relay(&self, conn: &ConnId, kind: RelayKind, payload: Value, to: ConnId, out: &mut Outcome) {
        if self.queue.active_peer(conn) != Some(&to) {
            tracing::debug!(
                component = "relay",
                room = %self.room,
                from = %conn,
                to = %to,
                kind = kind.as_str(),
                "dropping misdirected signaling payload"
            );
            return;
        }
        out.send(&to, self.room, ServerEvent::relayed(kind, payload, conn.clone()));
    }

    /// Leave and disconnect share this path. Returns whether anything changed.
    fn depart(&mut self, conn: &ConnId, timeout: Option<Duration>, out: &mut Outcome) -> bool {
        let was_waiting = self.queue.remove_waiting(conn);
        // Counterpart is notified while the departing name is still known.
        let had_pairing = match self.queue.dissolve(conn) {
            Some(pairing) => {
                self.notify_abandoned(&pairing, conn, timeout, out);
                true
            }
            None => false,
        };

        let joined_at = self.presence.joined_at(conn);
        let was_present = self.presence.leave(conn);
        if was_present {
            tracing::info!(
                component = "presence",
                room = %self.room,
                conn_id = %conn,
                present_for_secs = joined_at.map(|at| (chrono::Utc::now() - at).num_seconds()).unwrap_or_default(),
                "participant left"
            );
            self.broadcast_roster(out);
        }
        was_waiting || had_pairing || was_present
    }

    fn expire(&mut self, pairing_id: Uuid, timeout: Option<Duration>, out: &mut Outcome) {
        let absent = match self.queue.pairing(pairing_id) {
            Some(pairing) if !pairing.is_active() => pairing.pending_members(),
            _ => return,
        };
        let Some(pairing) = self.queue.remove_pairing(pairing_id) else {
            return;
        };
        tracing::info!(
            component = "matchmaking",
            room = %self.room,
            pairing_id = %pairing_id,
            unanswered = absent.len(),
            "pairing response timed out"
        );

        for member in &pairing.members {
            let Some(peer) = pairing.peer_of(member) else {
                continue;
            };
            if absent.contains(member) {
                out.send(member, self.room, ServerEvent::ChatEnded { by: None, name: None });
            } else {
                out.send(
                    member,
                    self.room,
                    ServerEvent::ChatSkip {
                        by: Some(peer.clone()),
                        name: self.name_of(peer),
                    },
                );
                self.requeue(member.clone());
            }
        }
        self.pair_waiting(timeout, out);
    }
}

/// Owns presence, waiting pools and pairings for both room types.
pub struct Switchboard {
    lobbies: HashMap<RoomType, Lobby>,
    response_timeout: Option<Duration>,
}

impl Switchboard {
    pub fn new(response_timeout: Option<Duration>) -> Self {
        let lobbies = RoomType::ALL
            .into_iter()
            .map(|room| (room, Lobby::new(room)))
            .collect();
        Self {
            lobbies,
            response_timeout,
        }
    }

    fn lobby_mut(&mut self, room: RoomType) -> &mut Lobby {
        self.lobbies.entry(room).or_insert_with(|| Lobby::new(room))
    }

    pub fn handle(&mut self, conn: &ConnId, room: RoomType, event: ClientEvent) -> Outcome {
        let timeout = self.response_timeout;
        let lobby = self.lobby_mut(room);
        let mut out = Outcome::default();

        match event {
            ClientEvent::JoinRoom { id, name, email } => {
                lobby.join(conn, ParticipantInfo { id, name, email }, &mut out)
            }
            ClientEvent::LeaveRoom => {
                lobby.depart(conn, timeout, &mut out);
            }
            ClientEvent::StartSearch => lobby.start_search(conn, timeout, &mut out),
            ClientEvent::UserResponse { response } => lobby.respond(conn, response, timeout, &mut out),
            ClientEvent::Offer { payload, to } => lobby.relay(conn, RelayKind::Offer, payload, to, &mut out),
            ClientEvent::Answer { payload, to } => lobby.relay(conn, RelayKind::Answer, payload, to, &mut out),
            ClientEvent::IceCandidate { payload, to } => {
                lobby.relay(conn, RelayKind::IceCandidate, payload, to, &mut out)
            }
            ClientEvent::ChatEnded { to, .. } => lobby.end_chat(conn, to.as_ref(), timeout, &mut out),
            ClientEvent::ChatSkip { to, .. } => lobby.skip_chat(conn, to.as_ref(), timeout, &mut out),
        }
        out
    }

    /// Abrupt connection loss. Safe to call more than once.
    pub fn disconnect(&mut self, conn: &ConnId) -> Outcome {
        let timeout = self.response_timeout;
        let mut out = Outcome::default();
        let mut touched = false;
        for room in RoomType::ALL {
            touched |= self.lobby_mut(room).depart(conn, timeout, &mut out);
        }
        if touched {
            tracing::info!(component = "cleanup", conn_id = %conn, notified = out.deliveries.len(), "connection cleaned up");
        }
        out
    }

    pub fn expire_pairing(&mut self, room: RoomType, pairing_id: Uuid) -> Outcome {
        let timeout = self.response_timeout;
        let mut out = Outcome::default();
        self.lobby_mut(room).expire(pairing_id, timeout, &mut out);
        out
    }

    pub fn state_of(&self, room: RoomType, conn: &ConnId) -> CallState {
        self.lobbies
            .get(&room)
            .map(|lobby| lobby.queue.state_of(conn))
            .unwrap_or_default()
    }

    pub fn roster(&self, room: RoomType) -> Vec<ParticipantInfo> {
        self.lobbies
            .get(&room)
            .map(|lobby| lobby.presence.list_present())
            .unwrap_or_default()
    }
}
