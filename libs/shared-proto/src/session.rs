//! Call session state machine shared by the signaling server and clients.
//!
//! The server is authoritative; clients run the same table against the
//! notifications they receive so both sides reject the same events.

use serde::{Deserialize, Serialize};

use crate::room::ConnId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    Searching,
    Matched,
    Waiting,
    Chatting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    StartSearch,
    Paired,
    RespondConnect,
    RespondSkip,
    /// Both sides of the pairing accepted.
    PeerConnected,
    PeerSkipped,
    /// Explicit end, leave, disconnect or media failure.
    End,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Searching => "searching",
            CallState::Matched => "matched",
            CallState::Waiting => "waiting",
            CallState::Chatting => "chatting",
        }
    }

    /// Next state for `event`, or `None` when the event is not legal here.
    pub fn on(self, event: SessionEvent) -> Option<CallState> {
        use CallState::*;
        use SessionEvent::*;

        match (self, event) {
            (_, End) => Some(Idle),
            (Idle, StartSearch) => Some(Searching),
            (Searching, Paired) => Some(Matched),
            (Matched, RespondConnect) => Some(Waiting),
            (Matched, RespondSkip) | (Matched, PeerSkipped) => Some(Searching),
            (Waiting, PeerConnected) => Some(Chatting),
            (Waiting, PeerSkipped) => Some(Searching),
            (Chatting, RespondSkip) | (Chatting, PeerSkipped) => Some(Searching),
            _ => None,
        }
    }

    /// Member of a pairing, active or not.
    pub fn is_paired(self) -> bool {
        matches!(self, CallState::Matched | CallState::Waiting | CallState::Chatting)
    }
}

/// Whether `own` must originate the media offer when talking to `peer`.
///
/// Both sides evaluate this independently; the smaller id wins.
pub fn is_initiator(own: &ConnId, peer: &ConnId) -> bool {
    own.as_str() < peer.as_str()
}
