//! Receive-only peer connection
//!
//! One [`ReceivePeer`] per accepted offer. It accepts one video and one
//! audio stream, turns the video into a [`StreamSession`] with a
//! [`FrameSink`], and tears everything down exactly once when the track
//! ends or the connection goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use super::config::{to_rtc_ice_servers, IceServerConfig};
use super::session::{SessionRegistry, StreamSession};
use super::signaling::{AnswerResponse, ConnectionState, OfferRequest};
use super::sink::FrameSink;
use super::track::{drain_audio_track, read_video_track, TrackEnd};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::inference::EmotionPipeline;

/// Keyframe request interval for received video
const PLI_INTERVAL: Duration = Duration::from_secs(3);

/// Shared services every peer hands to its stream session
#[derive(Clone)]
pub struct PeerContext {
    pub registry: Arc<SessionRegistry>,
    pub pipeline: Arc<EmotionPipeline>,
    pub events: Arc<EventBus>,
    /// Minimum interval between processed frames
    pub throttle: Duration,
}

/// Map the transport's connection state onto the session state machine
pub fn map_peer_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
            Some(ConnectionState::Negotiating)
        }
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

fn video_feedback() -> Vec<RTCPFeedback> {
    vec![
        RTCPFeedback {
            typ: "goog-remb".to_owned(),
            parameter: "".to_owned(),
        },
        RTCPFeedback {
            typ: "ccm".to_owned(),
            parameter: "fir".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
    ]
}

/// Media engine accepting H.264 video and Opus audio only
fn build_media_engine() -> Result<MediaEngine> {
    let mut media_engine = MediaEngine::default();

    // Constrained baseline, packetization-mode 1, with and without level asymmetry
    for (payload_type, fmtp) in [
        (
            102,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        ),
        (
            127,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
        ),
    ] {
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_H264.to_owned(),
                        clock_rate: 90000,
                        channels: 0,
                        sdp_fmtp_line: fmtp.to_owned(),
                        rtcp_feedback: video_feedback(),
                    },
                    payload_type,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(|e| AppError::WebRtcError(format!("Failed to register H.264 codec: {}", e)))?;
    }

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| AppError::WebRtcError(format!("Failed to register Opus codec: {}", e)))?;

    Ok(media_engine)
}

/// Video stream attached to a peer
struct VideoAttachment {
    session: Arc<StreamSession>,
    sink: Arc<FrameSink>,
}

/// Receive-only peer connection with emotion processing on its video track
pub struct ReceivePeer {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
    ctx: PeerContext,
    state: watch::Sender<ConnectionState>,
    video: Mutex<Option<VideoAttachment>>,
    has_video: AtomicBool,
    cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl ReceivePeer {
    /// Create the peer connection with recvonly video and audio transceivers
    pub async fn new(
        peer_id: String,
        ctx: PeerContext,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<Self>> {
        let mut media_engine = build_media_engine()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: to_rtc_ice_servers(ice_servers),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e)))?;
        }

        let (state, _) = watch::channel(ConnectionState::Negotiating);
        let peer = Arc::new(Self {
            peer_id,
            pc,
            ctx,
            state,
            video: Mutex::new(None),
            has_video: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        });
        peer.install_handlers();

        Ok(peer)
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once the peer has been torn down
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn install_handlers(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    let (Some(peer), Some(state)) = (weak.upgrade(), map_peer_state(s)) else {
                        return;
                    };
                    peer.on_state(state);
                })
            }));

        let weak: Weak<Self> = Arc::downgrade(self);
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(peer) = weak.upgrade() {
                    peer.attach_track(track);
                }
            })
        }));

        let peer_id = self.peer_id.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |state| {
                let peer_id = peer_id.clone();
                Box::pin(async move {
                    debug!("[ICE] Peer {} gathering state: {:?}", peer_id, state);
                })
            }));
    }

    /// Apply a transport state change; transitions the state machine does not
    /// allow (repeats, anything after `failed` or `closed`) are ignored
    fn on_state(&self, state: ConnectionState) {
        let mut previous = state;
        let changed = self.state.send_if_modified(|current| {
            if !current.can_transition_to(state) {
                return false;
            }
            previous = std::mem::replace(current, state);
            true
        });
        if !changed {
            debug!("Peer {} ignoring state {} (now {})", self.peer_id, state, self.state());
            return;
        }
        info!("Peer {} connection state: {} -> {}", self.peer_id, previous, state);

        let track_id = self.video.lock().as_ref().map(|v| {
            if !v.session.is_closed() {
                v.session.set_state(state);
            }
            v.session.track_id().to_string()
        });
        self.ctx.events.publish(SystemEvent::SessionStateChanged {
            peer_id: self.peer_id.clone(),
            track_id,
            state,
        });

        if state.requires_cleanup() && self.teardown(state) {
            let pc = self.pc.clone();
            let peer_id = self.peer_id.clone();
            tokio::spawn(async move {
                if let Err(e) = pc.close().await {
                    debug!("Peer {} close after {}: {}", peer_id, state, e);
                }
            });
        }
    }

    fn attach_track(self: &Arc<Self>, track: Arc<TrackRemote>) {
        let cancel = self.cancel.child_token();
        let kind = track.kind();
        let mime = track.codec().capability.mime_type;

        if kind != RTPCodecType::Video {
            debug!("Peer {} draining {} track ({})", self.peer_id, kind, mime);
            tokio::spawn(drain_audio_track(track, cancel));
            return;
        }

        if !mime.eq_ignore_ascii_case(MIME_TYPE_H264)
            || self.has_video.swap(true, Ordering::AcqRel)
        {
            warn!(
                "Peer {} ignoring video track {} ({})",
                self.peer_id,
                track.id(),
                mime
            );
            tokio::spawn(drain_audio_track(track, cancel));
            return;
        }

        let track_id = track.id();
        info!(
            "Peer {} received video track id={} stream={} ssrc={} codec={}",
            self.peer_id,
            track_id,
            track.stream_id(),
            track.ssrc(),
            mime
        );

        let Some(sink) = self.open_video(&track_id) else {
            debug!("Peer {} already torn down, ignoring track {}", self.peer_id, track_id);
            return;
        };

        self.spawn_keyframe_requests(track.ssrc(), cancel.clone());

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let end = read_video_track(track, sink, cancel).await;
            if end == TrackEnd::Ended {
                if let Some(peer) = weak.upgrade() {
                    peer.release_video(ConnectionState::Closed);
                }
            }
        });
    }

    /// Register a stream session and sink for a new video track
    ///
    /// Returns `None` once the peer is torn down, leaving nothing registered.
    fn open_video(&self, track_id: &str) -> Option<Arc<FrameSink>> {
        if self.is_torn_down() {
            return None;
        }

        let session = StreamSession::new(track_id, self.peer_id.clone());
        session.set_state(self.state());
        let sink = Arc::new(FrameSink::new(
            session.clone(),
            self.ctx.pipeline.clone(),
            self.ctx.throttle,
        ));
        self.ctx.registry.register(session.clone());
        *self.video.lock() = Some(VideoAttachment {
            session,
            sink: sink.clone(),
        });

        // Teardown may have run between the check above and the store
        if self.is_torn_down() {
            self.release_video(ConnectionState::Closed);
            return None;
        }
        Some(sink)
    }

    /// Periodic PLI so the decoder gets a keyframe soon after joining
    fn spawn_keyframe_requests(&self, media_ssrc: u32, cancel: CancellationToken) {
        let pc = Arc::downgrade(&self.pc);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PLI_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pc) = pc.upgrade() else { break };
                        let pli = PictureLossIndication {
                            sender_ssrc: 0,
                            media_ssrc,
                        };
                        if pc.write_rtcp(&[Box::new(pli)]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stop the sink and drop the stream session; no-op after the first call
    fn release_video(&self, state: ConnectionState) {
        let Some(video) = self.video.lock().take() else {
            return;
        };
        video.sink.stop();

        let track_id = video.session.track_id().to_string();
        self.ctx.pipeline.forget_track(&track_id);
        if self.ctx.registry.close(&track_id).is_some() {
            info!(
                "Stream session {} cleaned up ({}), frames processed: {}",
                track_id,
                state,
                video.session.info().frames_processed
            );
            self.ctx.events.publish(SystemEvent::SessionStateChanged {
                peer_id: self.peer_id.clone(),
                track_id: Some(track_id),
                state: ConnectionState::Closed,
            });
        }
    }

    /// Release every resource tied to this peer; `true` only the first time
    fn teardown(&self, state: ConnectionState) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.release_video(state);
        self.cancel.cancel();
        true
    }

    /// Apply the offer and produce an answer
    ///
    /// Waits for ICE gathering to complete, but never longer than
    /// `gather_timeout`; after that the answer carries whatever candidates
    /// were gathered so far.
    pub async fn negotiate(
        &self,
        offer: &OfferRequest,
        gather_timeout: Duration,
    ) -> Result<AnswerResponse> {
        let description = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| AppError::InvalidOffer(format!("Invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set remote description: {}", e)))?;

        for candidate in offer.ice_candidates.iter().flatten() {
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment.clone(),
            };
            if let Err(e) = self.pc.add_ice_candidate(init).await {
                warn!("Peer {} failed to add remote ICE candidate: {}", self.peer_id, e);
            }
        }

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(gather_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "Peer {} ICE gathering incomplete after {:?}, answering with partial candidates",
                self.peer_id, gather_timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| AppError::WebRtcError("Failed to create local description".to_string()))?;

        Ok(AnswerResponse::new(local.sdp_type.to_string(), local.sdp))
    }

    /// Close the connection if it has not connected within `timeout`
    pub fn spawn_idle_timer(self: &Arc<Self>, timeout: Duration) {
        let weak = Arc::downgrade(self);
        let mut state_rx = self.state.subscribe();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = async { let _ = state_rx.wait_for(|s| *s == ConnectionState::Connected).await; } => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(peer) = weak.upgrade() {
                        warn!("Peer {} did not connect within {:?}, closing", peer.peer_id, timeout);
                        peer.close().await;
                    }
                }
            }
        });
    }

    /// Tear down and close the underlying connection
    pub async fn close(&self) {
        self.teardown(ConnectionState::Closed);
        if let Err(e) = self.pc.close().await {
            debug!("Peer {} close: {}", self.peer_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::test_util;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_peer_state(RTCPeerConnectionState::Connecting),
            Some(ConnectionState::Negotiating)
        );
        assert_eq!(
            map_peer_state(RTCPeerConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(
            map_peer_state(RTCPeerConnectionState::Disconnected),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(
            map_peer_state(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
        assert_eq!(map_peer_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_media_engine_builds() {
        assert!(build_media_engine().is_ok());
    }

    async fn new_peer(ctx: &PeerContext) -> Arc<ReceivePeer> {
        ReceivePeer::new("peer-test".to_string(), ctx.clone(), &[])
            .await
            .unwrap()
    }

    fn closed_track_events(rx: &mut tokio::sync::broadcast::Receiver<SystemEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if let SystemEvent::SessionStateChanged {
                track_id: Some(_),
                state: ConnectionState::Closed,
                ..
            } = event
            {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let ctx = test_util::peer_context();
        let mut events = ctx.events.subscribe();
        let peer = new_peer(&ctx).await;

        assert!(peer.open_video("track-a").is_some());
        assert_eq!(ctx.registry.len(), 1);

        peer.on_state(ConnectionState::Disconnected);
        peer.on_state(ConnectionState::Failed);
        peer.on_state(ConnectionState::Closed);
        peer.close().await;

        assert_eq!(closed_track_events(&mut events), 1);
        assert!(ctx.registry.is_empty());
        assert!(peer.is_torn_down());
        assert!(!peer.teardown(ConnectionState::Closed));
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let ctx = test_util::peer_context();
        let peer = new_peer(&ctx).await;

        peer.on_state(ConnectionState::Failed);
        peer.on_state(ConnectionState::Connected);
        peer.on_state(ConnectionState::Closed);

        assert_eq!(peer.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_late_track_after_teardown_registers_nothing() {
        let ctx = test_util::peer_context();
        let peer = new_peer(&ctx).await;

        peer.close().await;

        assert!(peer.open_video("track-late").is_none());
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_idle_timer_closes_unconnected_peer() {
        let ctx = test_util::peer_context();
        let peer = new_peer(&ctx).await;
        assert!(peer.open_video("track-idle").is_some());

        peer.spawn_idle_timer(Duration::from_millis(200));

        assert_err!(tokio::time::timeout(Duration::from_millis(50), peer.closed()).await);
        assert_ok!(tokio::time::timeout(Duration::from_secs(5), peer.closed()).await);
        assert!(peer.is_torn_down());
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_idle_timer_spares_connected_peer() {
        let ctx = test_util::peer_context();
        let peer = new_peer(&ctx).await;

        peer.spawn_idle_timer(Duration::from_millis(100));
        peer.on_state(ConnectionState::Connected);

        assert_err!(tokio::time::timeout(Duration::from_millis(400), peer.closed()).await);
        assert!(!peer.is_torn_down());
        peer.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_negotiate_answers_browser_offer() {
        let ctx = test_util::peer_context();
        let peer = new_peer(&ctx).await;
        let (sender, offer) = test_util::sending_offer().await;

        let gather_timeout = Duration::from_secs(2);
        let started = std::time::Instant::now();
        let answer = peer.negotiate(&offer, gather_timeout).await.unwrap();

        assert_eq!(answer.sdp_type, "answer");
        assert!(answer.sdp.contains("m=video"));
        assert!(started.elapsed() <= gather_timeout + Duration::from_secs(1));

        peer.close().await;
        let _ = sender.close().await;
    }

    #[tokio::test]
    async fn test_negotiate_rejects_malformed_sdp() {
        let ctx = test_util::peer_context();
        let peer = new_peer(&ctx).await;

        let err = peer
            .negotiate(&OfferRequest::new("v=0\r\nbroken"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidOffer(_)));
        peer.close().await;
    }
}
