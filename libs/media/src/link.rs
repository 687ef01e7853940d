use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::{IceServerConfig, MediaError, MediaResult};

const STREAM_ID: &str = "stranger-local";

/// Which local tracks a call publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMedia {
    pub audio: bool,
    pub video: bool,
}

impl LocalMedia {
    pub fn voice() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    pub fn video() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// The call can no longer carry media.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LinkState::Disconnected | LinkState::Failed | LinkState::Closed
        )
    }
}

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => LinkState::Connecting,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
            _ => LinkState::New,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A gathered local candidate, already in wire form.
    LocalCandidate(Value),
    StateChanged(LinkState),
    RemoteTrack { kind: String },
}

#[derive(Default)]
struct CandidateQueue {
    remote_set: bool,
    queued: Vec<RTCIceCandidateInit>,
}

pub struct PeerLink {
    pc: Arc<RTCPeerConnection>,
    tracks: Vec<Arc<TrackLocalStaticSample>>,
    candidates: Mutex<CandidateQueue>,
}

impl PeerLink {
    /// Builds a fresh peer connection with local tracks attached.
    pub async fn open(
        ice_servers: &[IceServerConfig],
        media: LocalMedia,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> MediaResult<Self> {
        let pc = new_peer_connection(ice_servers)
            .await
            .map_err(|err| MediaError::Setup(format!("{err:#}")))?;
        wire_events(&pc, events);

        let tracks = match attach_local_tracks(&pc, media).await {
            Ok(tracks) => tracks,
            Err(err) => {
                let _ = pc.close().await;
                return Err(MediaError::LocalMedia(format!("{err:#}")));
            }
        };

        tracing::debug!(
            component = "media",
            tracks = tracks.len(),
            video = media.video,
            "peer link opened"
        );

        Ok(Self {
            pc,
            tracks,
            candidates: Mutex::new(CandidateQueue::default()),
        })
    }

    /// Sinks a capture pipeline writes encoded samples into.
    pub fn local_tracks(&self) -> &[Arc<TrackLocalStaticSample>] {
        &self.tracks
    }

    pub async fn create_offer(&self) -> MediaResult<Value> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer).await?;
        self.local_description().await
    }

    pub async fn accept_offer(&self, offer: Value) -> MediaResult<Value> {
        let offer: RTCSessionDescription = serde_json::from_value(offer)?;
        self.pc.set_remote_description(offer).await?;
        self.flush_candidates().await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer).await?;
        self.local_description().await
    }

    pub async fn apply_answer(&self, answer: Value) -> MediaResult<()> {
        let answer: RTCSessionDescription = serde_json::from_value(answer)?;
        self.pc.set_remote_description(answer).await?;
        self.flush_candidates().await
    }

    /// Candidates that arrive before the remote description are held back.
    pub async fn add_remote_candidate(&self, candidate: Value) -> MediaResult<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_value(candidate)?;
        let mut queue = self.candidates.lock().await;
        if queue.remote_set {
            drop(queue);
            self.pc.add_ice_candidate(candidate).await?;
        } else {
            queue.queued.push(candidate);
        }
        Ok(())
    }

    pub async fn queued_candidates(&self) -> usize {
        self.candidates.lock().await.queued.len()
    }

    pub fn state(&self) -> LinkState {
        self.pc.connection_state().into()
    }

    pub async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(component = "media", error = %err, "peer link close failed");
        }
    }

    async fn local_description(&self) -> MediaResult<Value> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or(MediaError::MissingLocalDescription)?;
        Ok(serde_json::to_value(local)?)
    }

    async fn flush_candidates(&self) -> MediaResult<()> {
        let pending = {
            let mut queue = self.candidates.lock().await;
            queue.remote_set = true;
            std::mem::take(&mut queue.queued)
        };
        for candidate in pending {
            self.pc.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }
}

async fn new_peer_connection(ice_servers: &[IceServerConfig]) -> anyhow::Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("registering default codecs")?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .context("registering default interceptors")?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: ice_servers.iter().map(RTCIceServer::from).collect(),
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .context("creating peer connection")?;
    Ok(Arc::new(pc))
}

fn wire_events(pc: &Arc<RTCPeerConnection>, events: mpsc::UnboundedSender<LinkEvent>) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json().map(serde_json::to_value) {
                Ok(Ok(json)) => {
                    let _ = tx.send(LinkEvent::LocalCandidate(json));
                }
                Ok(Err(err)) => {
                    tracing::warn!(component = "media", error = %err, "failed to encode local candidate")
                }
                Err(err) => {
                    tracing::warn!(component = "media", error = %err, "failed to serialize local candidate")
                }
            }
        })
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            tracing::debug!(component = "media", state = %state, "peer connection state changed");
            let _ = tx.send(LinkEvent::StateChanged(state.into()));
        })
    }));

    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = events.clone();
        Box::pin(async move {
            let _ = tx.send(LinkEvent::RemoteTrack {
                kind: track.kind().to_string(),
            });
        })
    }));
}

async fn attach_local_tracks(
    pc: &Arc<RTCPeerConnection>,
    media: LocalMedia,
) -> anyhow::Result<Vec<Arc<TrackLocalStaticSample>>> {
    let mut codecs = Vec::new();
    if media.audio {
        codecs.push((MIME_TYPE_OPUS, "audio"));
    }
    if media.video {
        codecs.push((MIME_TYPE_VP8, "video"));
    }

    let mut tracks = Vec::with_capacity(codecs.len());
    for (mime_type, id) in codecs {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            STREAM_ID.to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .with_context(|| format!("adding local {id} track"))?;

        // RTCP has to be drained for interceptors to work.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        tracks.push(track);
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_end_the_call() {
        assert!(LinkState::Failed.is_terminal());
        assert!(LinkState::Disconnected.is_terminal());
        assert!(LinkState::Closed.is_terminal());
        assert!(!LinkState::Connecting.is_terminal());
        assert!(!LinkState::Connected.is_terminal());
        assert_eq!(LinkState::from(RTCPeerConnectionState::Unspecified), LinkState::New);
    }

    #[tokio::test]
    async fn offer_answer_exchange_between_links() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let caller = PeerLink::open(&[], LocalMedia::voice(), tx_a).await.expect("caller link");
        let callee = PeerLink::open(&[], LocalMedia::voice(), tx_b).await.expect("callee link");
        assert_eq!(caller.local_tracks().len(), 1);

        let offer = caller.create_offer().await.expect("offer");
        assert_eq!(offer["type"], "offer");

        let answer = callee.accept_offer(offer).await.expect("answer");
        assert_eq!(answer["type"], "answer");
        caller.apply_answer(answer).await.expect("apply answer");

        caller.close().await;
        callee.close().await;
    }

    #[tokio::test]
    async fn early_candidates_wait_for_remote_description() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = PeerLink::open(&[], LocalMedia::video(), tx).await.expect("link");
        assert_eq!(link.local_tracks().len(), 2);

        let candidate = serde_json::json!({
            "candidate": "candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        link.add_remote_candidate(candidate).await.expect("queued");
        assert_eq!(link.queued_candidates().await, 1);

        assert!(link.add_remote_candidate(serde_json::json!("garbage")).await.is_err());
        link.close().await;
    }
}
