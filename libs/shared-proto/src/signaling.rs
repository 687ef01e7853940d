use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::{ConnId, ParticipantInfo, RoomType};

pub const PROTOCOL_VERSION: u8 = 2;

pub fn is_supported_protocol_version(version: u8) -> bool {
    version == PROTOCOL_VERSION
}

fn default_version() -> u8 {
    PROTOCOL_VERSION
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Connect,
    Skip,
}

/// The three opaque negotiation payload kinds the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
}

impl RelayKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "ice-candidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        id: String,
        name: String,
        #[serde(default)]
        email: Option<String>,
    },
    LeaveRoom,
    StartSearch,
    UserResponse {
        response: Response,
    },
    Offer {
        payload: Value,
        to: ConnId,
    },
    Answer {
        payload: Value,
        to: ConnId,
    },
    IceCandidate {
        payload: Value,
        to: ConnId,
    },
    ChatEnded {
        #[serde(default)]
        to: Option<ConnId>,
        #[serde(default)]
        name: Option<String>,
    },
    ChatSkip {
        #[serde(default)]
        to: Option<ConnId>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::LeaveRoom => "leave-room",
            ClientEvent::StartSearch => "start-search",
            ClientEvent::UserResponse { .. } => "user-response",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::IceCandidate { .. } => "ice-candidate",
            ClientEvent::ChatEnded { .. } => "chat-ended",
            ClientEvent::ChatSkip { .. } => "chat-skip",
        }
    }

    pub fn relay(kind: RelayKind, payload: Value, to: ConnId) -> Self {
        match kind {
            RelayKind::Offer => ClientEvent::Offer { payload, to },
            RelayKind::Answer => ClientEvent::Answer { payload, to },
            RelayKind::IceCandidate => ClientEvent::IceCandidate { payload, to },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Protocol,
    UnsupportedVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    Welcome {
        #[serde(rename = "connId")]
        conn_id: ConnId,
        #[serde(rename = "protocolVersion")]
        protocol_version: u8,
    },
    RoomUsers {
        users: Vec<ParticipantInfo>,
    },
    MatchFound {
        #[serde(rename = "peerId")]
        peer_id: ConnId,
        #[serde(rename = "peerInfo")]
        peer_info: ParticipantInfo,
    },
    ChatStart {
        #[serde(rename = "peerId")]
        peer_id: ConnId,
        #[serde(rename = "peerInfo")]
        peer_info: ParticipantInfo,
    },
    WaitingPeerResponse,
    ChatSkip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<ConnId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    ChatEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<ConnId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Offer {
        payload: Value,
        from: ConnId,
    },
    Answer {
        payload: Value,
        from: ConnId,
    },
    IceCandidate {
        payload: Value,
        from: ConnId,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    pub fn relayed(kind: RelayKind, payload: Value, from: ConnId) -> Self {
        match kind {
            RelayKind::Offer => ServerEvent::Offer { payload, from },
            RelayKind::Answer => ServerEvent::Answer { payload, from },
            RelayKind::IceCandidate => ServerEvent::IceCandidate { payload, from },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default = "default_version")]
    pub version: u8,
    pub room: RoomType,
    pub event: ClientEvent,
}

impl ClientFrame {
    pub fn new(room: RoomType, event: ClientEvent) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            room,
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Absent for connection-scoped events such as `welcome`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomType>,
    pub event: ServerEvent,
}

impl ServerFrame {
    pub fn room(room: RoomType, event: ServerEvent) -> Self {
        Self {
            room: Some(room),
            event,
        }
    }

    pub fn connection(event: ServerEvent) -> Self {
        Self { room: None, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_join_frame() {
        let raw = json!({
            "room": "video",
            "event": { "type": "join-room", "id": "u-1", "name": "Ada", "email": "ada@example.com" }
        });
        let frame: ClientFrame = serde_json::from_value(raw).expect("parse join frame");

        assert_eq!(frame.version, PROTOCOL_VERSION);
        assert_eq!(frame.room, RoomType::Video);
        assert_eq!(
            frame.event,
            ClientEvent::JoinRoom {
                id: "u-1".to_string(),
                name: "Ada".to_string(),
                email: Some("ada@example.com".to_string()),
            }
        );
    }

    #[test]
    fn parses_unit_and_response_events() {
        let search: ClientEvent =
            serde_json::from_value(json!({ "type": "start-search" })).expect("parse start-search");
        assert_eq!(search, ClientEvent::StartSearch);

        let skip: ClientEvent = serde_json::from_value(json!({ "type": "user-response", "response": "skip" }))
            .expect("parse user-response");
        assert_eq!(skip, ClientEvent::UserResponse { response: Response::Skip });
    }

    #[test]
    fn match_found_uses_camel_case_fields() {
        let frame = ServerFrame::room(
            RoomType::Voice,
            ServerEvent::MatchFound {
                peer_id: ConnId::from("c-2"),
                peer_info: ParticipantInfo {
                    id: "u-2".to_string(),
                    name: "Bo".to_string(),
                    email: None,
                },
            },
        );
        let json = serde_json::to_value(&frame).expect("serialize frame");

        assert_eq!(json["room"], "voice");
        assert_eq!(json["event"]["type"], "match-found");
        assert_eq!(json["event"]["peerId"], "c-2");
        assert_eq!(json["event"]["peerInfo"]["name"], "Bo");
        assert!(json["event"]["peerInfo"].get("email").is_none());
    }

    #[test]
    fn connection_frames_omit_room() {
        let frame = ServerFrame::connection(ServerEvent::Welcome {
            conn_id: ConnId::from("c-1"),
            protocol_version: PROTOCOL_VERSION,
        });
        let json = serde_json::to_value(&frame).expect("serialize welcome");

        assert!(json.get("room").is_none());
        assert_eq!(json["event"]["connId"], "c-1");
    }

    #[test]
    fn relayed_payload_is_untouched() {
        let payload = json!({ "sdp": "v=0\r\n", "type": "offer", "extra": [1, 2, 3] });
        let event = ServerEvent::relayed(RelayKind::Offer, payload.clone(), ConnId::from("a"));
        let json = serde_json::to_value(&event).expect("serialize relayed");

        assert_eq!(json["type"], "offer");
        assert_eq!(json["payload"], payload);
        assert_eq!(json["from"], "a");
    }

    #[test]
    fn only_the_current_version_is_supported() {
        assert!(is_supported_protocol_version(PROTOCOL_VERSION));
        assert!(!is_supported_protocol_version(1));
        assert!(!is_supported_protocol_version(99));
    }
}
