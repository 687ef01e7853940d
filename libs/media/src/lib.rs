//! Real-time media transport boundary.
//!
//! Wraps one `webrtc` peer connection per call. Negotiation payloads cross
//! this boundary as opaque JSON so callers never touch `webrtc` types.

pub mod ice;
pub mod link;

pub use ice::IceServerConfig;
pub use link::{LinkEvent, LinkState, LocalMedia, PeerLink};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("peer connection setup failed: {0}")]
    Setup(String),

    #[error("local media unavailable: {0}")]
    LocalMedia(String),

    #[error("negotiation failed: {0}")]
    Negotiation(#[from] webrtc::Error),

    #[error("malformed signaling payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("no local description after negotiation")]
    MissingLocalDescription,
}

pub type MediaResult<T> = Result<T, MediaError>;
