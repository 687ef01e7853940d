//! Client-side mirror of one room's call session.
//!
//! `CallSession` never performs I/O. Every input returns the
//! [`SessionAction`]s the driver has to carry out, in order.

use chrono::{DateTime, Utc};
use media::{LinkEvent, LinkState};
use serde_json::Value;
use shared_proto::signaling::{RelayKind, Response};
use shared_proto::{
    is_initiator, CallState, ClientEvent, ConnId, ParticipantInfo, RoomType, ServerEvent,
    SessionEvent,
};

/// What the local user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join,
    Search,
    Connect,
    Skip,
    End,
    Leave,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "join" => Some(Command::Join),
            "search" | "start" => Some(Command::Search),
            "connect" | "accept" => Some(Command::Connect),
            "skip" | "next" => Some(Command::Skip),
            "end" | "hangup" => Some(Command::End),
            "leave" => Some(Command::Leave),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Send(ClientEvent),
    /// A new active call; the previous link, if any, is already gone.
    OpenLink { peer: ConnId, initiator: bool },
    CloseLink,
    /// Remote negotiation payload for the current link.
    Negotiate { kind: RelayKind, payload: Value },
    Announce(String),
}

#[derive(Debug, Clone)]
struct Peer {
    conn: ConnId,
    info: ParticipantInfo,
}

#[derive(Debug)]
pub struct CallSession {
    room: RoomType,
    identity: ParticipantInfo,
    own: Option<ConnId>,
    joined: bool,
    state: CallState,
    peer: Option<Peer>,
    call_started_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(room: RoomType, identity: ParticipantInfo) -> Self {
        Self {
            room,
            identity,
            own: None,
            joined: false,
            state: CallState::Idle,
            peer: None,
            call_started_at: None,
        }
    }

    pub fn room(&self) -> RoomType {
        self.room
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn peer(&self) -> Option<&ConnId> {
        self.peer.as_ref().map(|peer| &peer.conn)
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    fn advance(&mut self, event: SessionEvent) -> bool {
        match self.state.on(event) {
            Some(next) => {
                tracing::debug!(
                    component = "session",
                    from = self.state.as_str(),
                    to = next.as_str(),
                    event = ?event,
                    "session transition"
                );
                self.state = next;
                true
            }
            None => {
                tracing::debug!(
                    component = "session",
                    state = self.state.as_str(),
                    event = ?event,
                    "ignoring invalid transition"
                );
                false
            }
        }
    }

    /// Drops the current call; `CloseLink` only when one was live.
    fn leave_call(&mut self, actions: &mut Vec<SessionAction>) {
        if let Some(started) = self.call_started_at.take() {
            tracing::info!(
                component = "session",
                room = %self.room,
                duration_secs = (Utc::now() - started).num_seconds(),
                "call finished"
            );
            actions.push(SessionAction::CloseLink);
        }
        self.peer = None;
    }

    fn peer_name(&self) -> String {
        self.peer
            .as_ref()
            .map(|peer| peer.info.name.clone())
            .unwrap_or_else(|| "stranger".to_string())
    }

    pub fn command(&mut self, command: Command) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match command {
            Command::Join => {
                self.joined = true;
                actions.push(SessionAction::Send(self.join_event()));
            }
            Command::Search => {
                if !self.joined {
                    actions.push(SessionAction::Announce("join the room first".to_string()));
                } else if self.advance(SessionEvent::StartSearch) {
                    actions.push(SessionAction::Send(ClientEvent::StartSearch));
                    actions.push(SessionAction::Announce("searching for a stranger...".to_string()));
                }
            }
            Command::Connect => {
                if self.advance(SessionEvent::RespondConnect) {
                    actions.push(SessionAction::Send(ClientEvent::UserResponse {
                        response: Response::Connect,
                    }));
                }
            }
            Command::Skip => match self.state {
                CallState::Matched => {
                    if self.advance(SessionEvent::RespondSkip) {
                        self.peer = None;
                        actions.push(SessionAction::Send(ClientEvent::UserResponse {
                            response: Response::Skip,
                        }));
                    }
                }
                CallState::Chatting => {
                    let to = self.peer().cloned();
                    if self.advance(SessionEvent::RespondSkip) {
                        actions.push(SessionAction::Send(ClientEvent::ChatSkip {
                            to,
                            name: Some(self.identity.name.clone()),
                        }));
                        self.leave_call(&mut actions);
                        actions.push(SessionAction::Announce("skipped, searching again...".to_string()));
                    }
                }
                CallState::Waiting => {
                    actions.push(SessionAction::Announce(
                        "already accepted; waiting for the stranger. Use end or leave to give up".to_string(),
                    ));
                }
                state => tracing::debug!(component = "session", state = state.as_str(), "nothing to skip"),
            },
            Command::End => {
                if self.state.is_paired() {
                    actions.push(SessionAction::Send(ClientEvent::ChatEnded {
                        to: self.peer().cloned(),
                        name: Some(self.identity.name.clone()),
                    }));
                    self.advance(SessionEvent::End);
                    self.leave_call(&mut actions);
                }
            }
            Command::Leave => {
                if self.joined {
                    self.joined = false;
                    actions.push(SessionAction::Send(ClientEvent::LeaveRoom));
                    self.advance(SessionEvent::End);
                    self.leave_call(&mut actions);
                }
            }
        }
        actions
    }

    pub fn on_server(&mut self, event: ServerEvent) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match event {
            ServerEvent::Welcome { conn_id, .. } => {
                tracing::info!(component = "session", conn_id = %conn_id, "assigned connection id");
                self.own = Some(conn_id);
            }
            ServerEvent::RoomUsers { users } => {
                actions.push(SessionAction::Announce(format!("{} in the {} room", users.len(), self.room)));
            }
            ServerEvent::MatchFound { peer_id, peer_info } => {
                if self.advance(SessionEvent::Paired) {
                    actions.push(SessionAction::Announce(format!(
                        "matched with {}: connect or skip?",
                        peer_info.name
                    )));
                    self.peer = Some(Peer {
                        conn: peer_id,
                        info: peer_info,
                    });
                }
            }
            ServerEvent::WaitingPeerResponse => {
                actions.push(SessionAction::Announce(format!("waiting for {}...", self.peer_name())));
            }
            ServerEvent::ChatStart { peer_id, peer_info } => {
                if self.peer() != Some(&peer_id) {
                    tracing::warn!(component = "session", peer_id = %peer_id, "chat-start for unexpected peer");
                }
                if self.advance(SessionEvent::PeerConnected) {
                    let initiator = self
                        .own
                        .as_ref()
                        .map(|own| is_initiator(own, &peer_id))
                        .unwrap_or(false);
                    actions.push(SessionAction::Announce(format!("connected with {}", peer_info.name)));
                    self.peer = Some(Peer {
                        conn: peer_id.clone(),
                        info: peer_info,
                    });
                    self.call_started_at = Some(Utc::now());
                    actions.push(SessionAction::OpenLink {
                        peer: peer_id,
                        initiator,
                    });
                }
            }
            ServerEvent::ChatSkip { name, .. } => {
                if self.advance(SessionEvent::PeerSkipped) {
                    let who = name.unwrap_or_else(|| self.peer_name());
                    self.leave_call(&mut actions);
                    actions.push(SessionAction::Announce(format!("{who} skipped, searching again...")));
                }
            }
            ServerEvent::ChatEnded { by, name } => {
                if self.state.is_paired() && self.advance(SessionEvent::End) {
                    let message = match by {
                        Some(_) => format!("{} ended the chat", name.unwrap_or_else(|| self.peer_name())),
                        None => "no response in time, search again when ready".to_string(),
                    };
                    self.leave_call(&mut actions);
                    actions.push(SessionAction::Announce(message));
                }
            }
            ServerEvent::Offer { payload, from } => self.remote(RelayKind::Offer, payload, &from, &mut actions),
            ServerEvent::Answer { payload, from } => self.remote(RelayKind::Answer, payload, &from, &mut actions),
            ServerEvent::IceCandidate { payload, from } => {
                self.remote(RelayKind::IceCandidate, payload, &from, &mut actions)
            }
            ServerEvent::Error { code, message } => {
                tracing::warn!(component = "session", code = ?code, message = %message, "server rejected frame");
            }
        }
        actions
    }

    fn remote(&self, kind: RelayKind, payload: Value, from: &ConnId, actions: &mut Vec<SessionAction>) {
        if self.state != CallState::Chatting || self.peer() != Some(from) {
            tracing::debug!(component = "session", from = %from, kind = kind.as_str(), "dropping stray negotiation payload");
            return;
        }
        actions.push(SessionAction::Negotiate { kind, payload });
    }

    pub fn on_link(&mut self, event: LinkEvent) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state != CallState::Chatting {
            return actions;
        }
        match event {
            LinkEvent::LocalCandidate(payload) => {
                if let Some(to) = self.peer().cloned() {
                    actions.push(SessionAction::Send(ClientEvent::IceCandidate { payload, to }));
                }
            }
            LinkEvent::StateChanged(LinkState::Connected) => {
                actions.push(SessionAction::Announce(format!("media flowing with {}", self.peer_name())));
            }
            LinkEvent::StateChanged(state) if state.is_terminal() => {
                tracing::warn!(component = "session", state = ?state, "media connection lost");
                actions.push(SessionAction::Send(ClientEvent::ChatEnded {
                    to: self.peer().cloned(),
                    name: Some(self.identity.name.clone()),
                }));
                self.advance(SessionEvent::End);
                self.leave_call(&mut actions);
                actions.push(SessionAction::Announce("call dropped".to_string()));
            }
            LinkEvent::StateChanged(_) => {}
            LinkEvent::RemoteTrack { kind } => {
                tracing::info!(component = "session", kind = %kind, "remote track received");
            }
        }
        actions
    }

    /// After a reconnect the server has forgotten us under a new id.
    pub fn on_reconnected(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.own = None;
        self.state = CallState::Idle;
        self.leave_call(&mut actions);
        if self.joined {
            actions.push(SessionAction::Send(self.join_event()));
            actions.push(SessionAction::Announce("reconnected, rejoined the room".to_string()));
        }
        actions
    }

    fn join_event(&self) -> ClientEvent {
        ClientEvent::JoinRoom {
            id: self.identity.id.clone(),
            name: self.identity.name.clone(),
            email: self.identity.email.clone(),
        }
    }
}
