use std::future::pending;
use std::sync::Arc;

use media::{IceServerConfig, LinkEvent, LocalMedia, PeerLink};
use serde_json::Value;
use shared_proto::signaling::RelayKind;
use shared_proto::{ClientEvent, ConnId, RoomType};
use tokio::sync::mpsc;

use crate::error::ClientResult;
use crate::session::{CallSession, Command, SessionAction};
use crate::signaling::{SignalingEvent, SignalingHandle};

/// Input from the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Quit,
}

struct ActiveLink {
    peer: ConnId,
    link: Arc<PeerLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

pub struct Driver {
    session: CallSession,
    signaling: SignalingHandle,
    ice_servers: Vec<IceServerConfig>,
    link: Option<ActiveLink>,
    announce: mpsc::UnboundedSender<String>,
}

impl Driver {
    pub fn new(
        session: CallSession,
        signaling: SignalingHandle,
        ice_servers: Vec<IceServerConfig>,
        announce: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            session,
            signaling,
            ice_servers,
            link: None,
            announce,
        }
    }

    pub async fn run(
        mut self,
        mut signaling: mpsc::UnboundedReceiver<SignalingEvent>,
        mut input: mpsc::UnboundedReceiver<Input>,
    ) -> ClientResult<()> {
        let mut connected_once = false;

        loop {
            // Server events first, so a command is judged against the latest state.
            let actions = tokio::select! {
                biased;
                event = signaling.recv() => match event {
                    Some(SignalingEvent::Connected) if connected_once => self.session.on_reconnected(),
                    Some(SignalingEvent::Connected) => {
                        connected_once = true;
                        Vec::new()
                    }
                    Some(SignalingEvent::Frame(frame)) => {
                        if frame.room.is_some_and(|room| room != self.session.room()) {
                            continue;
                        }
                        self.session.on_server(frame.event)
                    }
                    Some(SignalingEvent::Disconnected) => {
                        vec![SessionAction::Announce("signaling connection lost, reconnecting...".to_string())]
                    }
                    None => break,
                },
                link_event = next_link_event(&mut self.link) => self.session.on_link(link_event),
                input = input.recv() => match input {
                    Some(Input::Command(command)) => self.session.command(command),
                    Some(Input::Quit) | None => {
                        let mut actions = self.session.command(Command::Leave);
                        actions.push(SessionAction::CloseLink);
                        self.apply(actions).await?;
                        break;
                    }
                },
            };
            self.apply(actions).await?;
        }

        self.close_link().await;
        Ok(())
    }

    async fn apply(&mut self, actions: Vec<SessionAction>) -> ClientResult<()> {
        for action in actions {
            match action {
                SessionAction::Send(event) => self.signaling.send(event)?,
                SessionAction::OpenLink { peer, initiator } => self.open_link(peer, initiator).await?,
                SessionAction::CloseLink => self.close_link().await,
                SessionAction::Negotiate { kind, payload } => self.negotiate(kind, payload).await?,
                SessionAction::Announce(line) => {
                    let _ = self.announce.send(line);
                }
            }
        }
        Ok(())
    }

    async fn open_link(&mut self, peer: ConnId, initiator: bool) -> ClientResult<()> {
        self.close_link().await;

        let media = match self.session.room() {
            RoomType::Voice => LocalMedia::voice(),
            RoomType::Video => LocalMedia::video(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let link = match PeerLink::open(&self.ice_servers, media, tx).await {
            Ok(link) => Arc::new(link),
            Err(err) => {
                // Stays chatting without media until the user ends or skips.
                tracing::error!(component = "media", peer_id = %peer, error = %err, "could not start local media");
                let _ = self.announce.send(format!("media unavailable: {err}"));
                return Ok(());
            }
        };
        tracing::info!(component = "media", peer_id = %peer, initiator, "peer link opened");

        if initiator {
            match link.create_offer().await {
                Ok(payload) => self.signaling.send(ClientEvent::Offer {
                    payload,
                    to: peer.clone(),
                })?,
                Err(err) => tracing::error!(component = "media", error = %err, "failed to create offer"),
            }
        }

        self.link = Some(ActiveLink {
            peer,
            link,
            events: rx,
        });
        Ok(())
    }

    async fn close_link(&mut self) {
        if let Some(active) = self.link.take() {
            active.link.close().await;
            tracing::info!(component = "media", peer_id = %active.peer, "peer link closed");
        }
    }

    async fn negotiate(&mut self, kind: RelayKind, payload: Value) -> ClientResult<()> {
        let Some(active) = self.link.as_ref() else {
            tracing::debug!(component = "media", kind = kind.as_str(), "no peer link for negotiation payload");
            return Ok(());
        };
        let link = Arc::clone(&active.link);
        let peer = active.peer.clone();

        let result = match kind {
            RelayKind::Offer => match link.accept_offer(payload).await {
                Ok(answer) => {
                    self.signaling.send(ClientEvent::Answer { payload: answer, to: peer })?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            RelayKind::Answer => link.apply_answer(payload).await,
            RelayKind::IceCandidate => link.add_remote_candidate(payload).await,
        };
        if let Err(err) = result {
            tracing::warn!(component = "media", kind = kind.as_str(), error = %err, "negotiation step failed");
        }
        Ok(())
    }
}

async fn next_link_event(link: &mut Option<ActiveLink>) -> LinkEvent {
    match link {
        Some(active) => match active.events.recv().await {
            Some(event) => event,
            None => pending().await,
        },
        None => pending().await,
    }
}
